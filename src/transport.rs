/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Signed HTTP transport: retrying POST/GET plus dual-form envelope
//! extraction.

use crate::error::{kind_for_code, Error, ErrorKind, Result};
use crate::gateway::{APPLICATION_KEY, SECURITY_KEY};
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_SECS: f64 = 0.5;

/// Per-[`crate::Client`] transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Hosts that must be reached with the legacy TLSv1 adapter rather than
    /// the default modern-cipher client. Never applied implicitly — a URL is
    /// only downgraded if its host is in this list.
    pub tls_downgrade_hosts: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::from_secs_f64(BASE_BACKOFF_SECS),
            tls_downgrade_hosts: Vec::new(),
        }
    }
}

/// Signed POST/GET transport with retry/backoff and envelope unwrapping.
///
/// A plain blocking `reqwest` client with errors parsed out of the JSON
/// body, rather than an async design, since this protocol is serial
/// request/response per session.
pub struct Transport {
    client: reqwest::blocking::Client,
    legacy_client: reqwest::blocking::Client,
    config: TransportConfig,
    /// Set only by [`Transport::new_for_test`]: rewrites every outgoing
    /// request's scheme/host/port to this origin so that code addressing a
    /// fixed, real vendor host (e.g. gateway discovery's constant URL) can be
    /// exercised against a local mock server without changing that code.
    base_override: Option<Url>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;
        // The legacy adapter negotiates TLSv1 explicitly; it is never used
        // unless the caller's config names the host, and it never disables
        // certificate verification.
        let legacy_client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_0)
            .build()?;
        Ok(Transport {
            client,
            legacy_client,
            config,
            base_override: None,
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base_url: &str) -> Self {
        let mut transport = Transport::new(TransportConfig::default()).unwrap();
        transport.base_override = Some(Url::parse(base_url).expect("valid test base url"));
        transport
    }

    /// Rewrites `url`'s origin to [`Transport::base_override`] when a test
    /// has set one; otherwise returns it unchanged.
    fn resolve(&self, url: &str) -> String {
        match (&self.base_override, Url::parse(url)) {
            (Some(base), Ok(mut parsed)) => {
                let _ = parsed.set_scheme(base.scheme());
                let _ = parsed.set_host(base.host_str());
                let _ = parsed.set_port(base.port());
                parsed.to_string()
            }
            _ => url.to_string(),
        }
    }

    fn client_for(&self, url: &str) -> &reqwest::blocking::Client {
        let downgraded = self
            .config
            .tls_downgrade_hosts
            .iter()
            .any(|host| url.contains(host.as_str()));
        if downgraded {
            &self.legacy_client
        } else {
            &self.client
        }
    }

    fn should_retry_status(status: reqwest::StatusCode) -> bool {
        matches!(status.as_u16(), 502 | 503 | 504)
    }

    fn should_retry_error(err: &reqwest::Error) -> bool {
        err.is_connect() || err.is_timeout()
    }

    fn sleep_for_attempt(&self, attempt: u32) {
        let secs = self.config.base_backoff.as_secs_f64() * 2f64.powi(attempt as i32);
        std::thread::sleep(Duration::from_secs_f64(secs));
    }

    /// Sends a request, retrying on 502/503/504 and connection-level errors.
    ///
    /// `build` is invoked fresh for every attempt since a `reqwest` request
    /// builder is consumed by `send()`.
    fn execute(
        &self,
        build: impl Fn(&reqwest::blocking::Client) -> reqwest::blocking::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::blocking::Response> {
        let client = self.client_for(url);
        let mut attempt = 0;
        loop {
            debug!("sending request to {url} (attempt {}/{})", attempt + 1, self.config.max_attempts);
            match build(client).send() {
                Ok(resp) if attempt + 1 < self.config.max_attempts && Self::should_retry_status(resp.status()) => {
                    warn!(
                        "{url} returned {} on attempt {}, retrying after backoff",
                        resp.status(),
                        attempt + 1
                    );
                    self.sleep_for_attempt(attempt);
                    attempt += 1;
                }
                Ok(resp) => return Ok(resp),
                Err(e) if attempt + 1 < self.config.max_attempts && Self::should_retry_error(&e) => {
                    warn!("request to {url} failed on attempt {}: {e}, retrying after backoff", attempt + 1);
                    self.sleep_for_attempt(attempt);
                    attempt += 1;
                }
                Err(e) => {
                    error!("request to {url} failed after {} attempt(s): {e}", attempt + 1);
                    return Err(Error::from(e));
                }
            }
        }
    }

    /// Plain `GET`, used for the v2 gateway discovery endpoint and for model
    /// schema documents, neither of which are envelope-wrapped.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T> {
        let resolved = self.resolve(url);
        let resp = self.execute(
            |client| {
                let mut req = client.get(&resolved).header("Accept", "application/json");
                for (k, v) in headers {
                    req = req.header(*k, *v);
                }
                req
            },
            url,
        )?;
        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            error!("GET {url} returned HTTP {status}");
            return Err(ErrorKind::ApiError {
                code: status.as_str().to_string(),
                message: text,
            }
            .into());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn standard_headers(access_token: Option<&str>, session_id: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("x-thinq-application-key".to_string(), APPLICATION_KEY.to_string()),
            ("x-thinq-security-key".to_string(), SECURITY_KEY.to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = access_token {
            headers.push(("x-thinq-token".to_string(), token.to_string()));
        }
        if let Some(session) = session_id {
            headers.push(("x-thinq-jsessionId".to_string(), session.to_string()));
        }
        headers
    }

    /// Legacy-envelope POST: wraps `body` under `root_key`, unwraps the
    /// response the same way, and raises a typed error if `returnCd` is
    /// present and not `"0000"`.
    pub fn post_legacy<T: DeserializeOwned>(
        &self,
        url: &str,
        root_key: &str,
        body: &Value,
        access_token: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<T> {
        let headers = Self::standard_headers(access_token, session_id);
        let envelope = serde_json::json!({ root_key: body });
        let resolved = self.resolve(url);
        let resp = self.execute(
            |client| {
                let mut req = client.post(&resolved).json(&envelope);
                for (k, v) in &headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                req
            },
            url,
        )?;
        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            error!("POST {url} returned HTTP {status}");
            return Err(ErrorKind::ApiError {
                code: status.as_str().to_string(),
                message: text,
            }
            .into());
        }
        let root: Value = serde_json::from_str(&text)?;
        let inner = root.get(root_key).cloned().unwrap_or(root);

        if let Some(code) = inner.get("returnCd").and_then(Value::as_str) {
            if code != "0000" {
                let message = inner
                    .get("returnMsg")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                error!("{url} returned vendor code {code}: {message}");
                return Err(kind_for_code(code, message).into());
            }
        }

        Ok(serde_json::from_value(inner)?)
    }

    /// Unwraps a v2-envelope response body: `{"result": ...}` with
    /// `resultCode`/`resultMessage` instead of the legacy `returnCd`/
    /// `returnMsg`. Used by [`Transport::get_v2`].
    fn unwrap_v2_envelope(url: &str, text: &str) -> Result<Value> {
        let root: Value = serde_json::from_str(text)?;
        let inner = root.get("result").cloned().unwrap_or(root);

        if let Some(code) = inner.get("resultCode").and_then(Value::as_str) {
            if code != "0000" {
                let message = inner
                    .get("resultMessage")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                error!("{url} returned vendor code {code}: {message}");
                return Err(kind_for_code(code, message).into());
            }
        }
        Ok(inner)
    }

    /// v2-envelope `GET`, used for the dashboard device-list call: unwraps
    /// the `resultCode`/`result` shape the same way [`Transport::post_legacy`]
    /// unwraps `returnCd`/`lgedmRoot`, but has no request body.
    pub fn get_v2<T: DeserializeOwned>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T> {
        let resolved = self.resolve(url);
        let resp = self.execute(
            |client| {
                let mut req = client.get(&resolved).header("Accept", "application/json");
                for (k, v) in headers {
                    req = req.header(*k, *v);
                }
                req
            },
            url,
        )?;
        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            error!("GET {url} returned HTTP {status}");
            return Err(ErrorKind::ApiError {
                code: status.as_str().to_string(),
                message: text,
            }
            .into());
        }
        Ok(serde_json::from_value(Self::unwrap_v2_envelope(url, &text)?)?)
    }

    /// Signed form POST used only for token refresh: `Authorization` carries
    /// the HMAC-SHA1 signature, `x-lge-appkey`/timestamp accompany it.
    pub fn post_form_signed<T: DeserializeOwned>(
        &self,
        url: &str,
        path_and_query: &str,
        form: &[(&str, &str)],
        signature: &str,
        timestamp: &str,
    ) -> Result<T> {
        let _ = path_and_query;
        let resolved = self.resolve(url);
        let resp = self.execute(
            |client| {
                client
                    .post(&resolved)
                    .header("x-thinq-application-key", APPLICATION_KEY)
                    .header("Authorization", format!("Signature={signature}"))
                    .header("x-lge-oauth-date", timestamp)
                    .header("Accept", "application/json")
                    .form(form)
            },
            url,
        )?;
        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            error!("token refresh at {url} returned HTTP {status}");
            return Err(ErrorKind::TokenError(format!("HTTP {status}: {text}")).into());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_503_then_succeeds() {
        let mut server = mockito::Server::new();
        let _m1 = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(1)
            .create();
        let _m2 = server
            .mock("GET", "/flaky")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create();

        let mut config = TransportConfig::default();
        config.base_backoff = Duration::from_millis(1);
        let transport = Transport::new(config).unwrap();
        let url = format!("{}/flaky", server.url());
        let body: Value = transport.get_json(&url, &[]).unwrap();
        assert_eq!(body["ok"], true);
    }

    #[test]
    fn retry_exhaustion_surfaces_the_last_status_as_an_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/always-503")
            .with_status(503)
            .expect(2)
            .create();

        let mut config = TransportConfig::default();
        config.base_backoff = Duration::from_millis(1);
        config.max_attempts = 2;
        let transport = Transport::new(config).unwrap();
        let url = format!("{}/always-503", server.url());
        let result: Result<Value> = transport.get_json(&url, &[]);
        match result {
            Err(e) => assert!(matches!(e.kind(), ErrorKind::ApiError { .. })),
            Ok(_) => panic!("expected the exhausted retry to surface as an error"),
        }
    }

    #[test]
    fn legacy_envelope_error_code_maps_to_typed_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("POST", "/member/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{"returnCd":"0102","returnMsg":"not logged in"}}"#)
            .create();

        let transport = Transport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/member/login", server.url());
        let result: Result<Value> =
            transport.post_legacy(&url, "lgedmRoot", &serde_json::json!({}), None, None);
        match result {
            Err(e) => assert!(matches!(e.kind(), ErrorKind::NotLoggedIn(_))),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn legacy_envelope_success_deserializes_inner() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("POST", "/device/deviceList")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{"returnCd":"0000","item":[{"deviceId":"abc"}]}}"#)
            .create();

        let transport = Transport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/device/deviceList", server.url());
        let body: Value =
            transport.post_legacy(&url, "lgedmRoot", &serde_json::json!({}), None, None).unwrap();
        assert_eq!(body["item"][0]["deviceId"], "abc");
    }
}
