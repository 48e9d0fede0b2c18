/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The authenticated RPC surface: device list, device config get/set, and
//! the monitor start/poll/stop calls.
//!
//! A `Session` is `Send` but not `Sync`: it holds no interior mutability of
//! its own, so concurrent calls from multiple threads against one `Session`
//! value are not serialized internally and must be avoided by the caller
//! (drive each `Session` from a single task at a time).

use crate::auth::AuthCredential;
use crate::device::DeviceDescriptor;
use crate::error::{Error, ErrorKind, Result};
use crate::gateway::v2_headers;
use crate::transport::Transport;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use uuid::Uuid;

/// Which control category a `get_device_config` lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCategory {
    Config,
    Control,
}

impl ConfigCategory {
    fn as_str(self) -> &'static str {
        match self {
            ConfigCategory::Config => "Config",
            ConfigCategory::Control => "Control",
        }
    }
}

pub struct Session {
    auth: AuthCredential,
    session_id: String,
    api_root: String,
    /// `None` when the gateway never advertised a `thinq2Uri`; in that case
    /// [`Session::get_devices`] falls back to the legacy `device/deviceList`
    /// call instead of the v2 dashboard.
    api2_root: Option<String>,
    country: String,
    language: String,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: AuthCredential,
        session_id: String,
        api_root: String,
        api2_root: Option<String>,
        country: String,
        language: String,
    ) -> Self {
        Session {
            auth,
            session_id,
            api_root,
            api2_root,
            country,
            language,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_root.trim_end_matches('/'), path)
    }

    fn auth_headers(&self) -> (Option<&str>, Option<&str>) {
        (
            Some(self.auth.access_token.as_str()),
            if self.session_id.is_empty() {
                None
            } else {
                Some(self.session_id.as_str())
            },
        )
    }

    /// Forwards an already-built body to `path`, returning the unwrapped
    /// inner envelope object.
    pub fn post(&self, transport: &Transport, path: &str, body: Value) -> Result<Value> {
        let (token, session) = self.auth_headers();
        transport.post_legacy(&self.endpoint(path), "lgedmRoot", &body, token, session)
    }

    /// Fetches the device list, preferring the v2 dashboard when the
    /// gateway advertised an `api2_root` and falling back to the legacy
    /// `device/deviceList` call otherwise.
    pub fn get_devices(&self, transport: &Transport) -> Result<Vec<DeviceDescriptor>> {
        match &self.api2_root {
            Some(root) => self.get_devices_v2(transport, root),
            None => self.get_devices_legacy(transport),
        }
    }

    /// `device/deviceList`, wrapping a singleton response in a one-item list.
    fn get_devices_legacy(&self, transport: &Transport) -> Result<Vec<DeviceDescriptor>> {
        let resp = self.post(transport, "device/deviceList", serde_json::json!({}))?;
        let items = match resp.get("item").cloned().unwrap_or(Value::Null) {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// `GET service/application/dashboard` against `api2_root`, the v2
    /// counterpart to [`Session::get_devices_legacy`].
    fn get_devices_v2(&self, transport: &Transport, api2_root: &str) -> Result<Vec<DeviceDescriptor>> {
        let url = format!("{}/service/application/dashboard", api2_root.trim_end_matches('/'));
        let owned = v2_headers(
            Some(self.auth.access_token.as_str()),
            self.auth.user_number.as_deref(),
            &self.country,
            &self.language,
        );
        let headers: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let resp: Value = transport.get_v2(&url, &headers)?;
        let items = match resp.get("item").cloned().unwrap_or(Value::Null) {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// `rti/rtiControl` with `cmdOpt=Set`, a fresh UUID work id.
    pub fn set_device_controls(
        &self,
        transport: &Transport,
        device_id: &str,
        key_values: &[(&str, &str)],
    ) -> Result<()> {
        let value_set: serde_json::Map<String, Value> = key_values
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect();
        let body = serde_json::json!({
            "cmd": "Control",
            "cmdOpt": "Set",
            "deviceId": device_id,
            "workId": Uuid::new_v4().to_string(),
            "value": Value::Object(value_set),
            "data": "",
        });
        self.post(transport, "rti/rtiControl", body)?;
        Ok(())
    }

    /// `rti/rtiControl` with `cmdOpt=Get`. The raw string result may be
    /// base64-encoded JSON or a `(key:value)` tuple depending on `key`;
    /// [`decode_config_as_base64_json`] and [`decode_config_as_tuple`] expose
    /// both interpretations, since the schema alone doesn't disambiguate
    /// which applies.
    pub fn get_device_config(
        &self,
        transport: &Transport,
        device_id: &str,
        key: &str,
        category: ConfigCategory,
    ) -> Result<String> {
        let body = serde_json::json!({
            "cmd": category.as_str(),
            "cmdOpt": "Get",
            "deviceId": device_id,
            "workId": Uuid::new_v4().to_string(),
            "value": key,
        });
        let resp = self.post(transport, "rti/rtiControl", body)?;
        Ok(resp
            .get("returnData")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// `rti/rtiMon` with `cmd=Mon`, `cmdOpt=Start`; returns the server-issued
    /// work id to poll with.
    pub fn monitor_start(&self, transport: &Transport, device_id: &str) -> Result<String> {
        let body = serde_json::json!({
            "cmd": "Mon",
            "cmdOpt": "Start",
            "deviceId": device_id,
            "workId": Uuid::new_v4().to_string(),
        });
        let resp = self.post(transport, "rti/rtiMon", body)?;
        Ok(resp
            .get("workId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// `rti/rtiResult` for the given work id.
    ///
    /// Returns `None` on warmup (no `returnCode` present) or when there is
    /// no `returnData` to decode; returns the decoded bytes when
    /// `returnCode == "0000"` and data is present; raises
    /// [`ErrorKind::MonitorError`] for any other code.
    pub fn monitor_poll(
        &self,
        transport: &Transport,
        device_id: &str,
        work_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let body = serde_json::json!({
            "cmd": "Mon",
            "cmdOpt": "Poll",
            "deviceId": device_id,
            "workId": work_id,
        });
        let (token, session) = self.auth_headers();
        let resp: Value = transport.post_legacy(
            &self.endpoint("rti/rtiResult"),
            "lgedmRoot",
            &body,
            token,
            session,
        )?;

        let return_code = resp.get("returnCode").and_then(Value::as_str);
        match return_code {
            None => Ok(None),
            Some("0000") => match resp.get("returnData").and_then(Value::as_str) {
                Some(encoded) if !encoded.is_empty() => {
                    Ok(Some(STANDARD.decode(encoded)?))
                }
                _ => Ok(None),
            },
            Some(code) => Err(ErrorKind::MonitorError(crate::error::MonitorFailure {
                device_id: device_id.to_string(),
                code: code.to_string(),
            })
            .into()),
        }
    }

    /// Best-effort stop; most errors are intentionally swallowed since the
    /// server may have already expired the job.
    pub fn monitor_stop(&self, transport: &Transport, device_id: &str, work_id: &str) {
        let body = serde_json::json!({
            "cmd": "Mon",
            "cmdOpt": "Stop",
            "deviceId": device_id,
            "workId": work_id,
        });
        let _ = self.post(transport, "rti/rtiMon", body);
    }
}

/// Interprets a `Config`-category [`Session::get_device_config`] result as
/// base64-encoded JSON.
pub fn decode_config_as_base64_json(raw: &str) -> Result<Value> {
    let decoded = STANDARD.decode(raw.trim())?;
    let text = String::from_utf8(decoded)?;
    Ok(serde_json::from_str(&text)?)
}

/// Interprets a `Control`-category [`Session::get_device_config`] result as
/// the `(key:value)` tuple format: strips the surrounding parens and returns
/// the half after the colon.
pub fn decode_config_as_tuple(raw: &str) -> Result<String> {
    let malformed = || {
        Error::from(ErrorKind::MalformedResponse {
            reason: "not a (key:value) tuple".to_string(),
            payload: raw.to_string(),
        })
    };
    let inner = raw
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let (_, value) = inner.split_once(':').ok_or_else(malformed)?;
    Ok(value.to_string())
}
