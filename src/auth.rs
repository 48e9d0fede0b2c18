/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! OAuth callback parsing, token refresh, and session establishment.

use crate::device::DeviceDescriptor;
use crate::error::{Error, ErrorKind, Result};
use crate::gateway::{GatewayEndpoints, OAUTH_REDIRECT_URI};
use crate::session::Session;
use crate::signature::sign_request;
use crate::transport::Transport;
use crate::util::rfc1123_timestamp;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use url::Url;

const V2_AUTH_PATH: &str = "/oauth/1.0/oauth2/token";
const LEGACY_AUTH_PATH: &str = "/oauth2/token";

/// The bearer-identity half of the protocol: the OAuth token pair plus
/// enough context to refresh and to address the v2 token endpoint.
///
/// `refresh_token` is the only durable secret; `access_token` rotates on
/// every successful [`AuthCredential::refresh`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub oauth_root: String,
    #[serde(default)]
    pub user_number: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl AuthCredential {
    /// Parses the browser redirect URL produced after the user completes
    /// the login page, handling both the legacy and v2 callback shapes.
    pub fn from_callback_url(
        transport: &Transport,
        gateway: &GatewayEndpoints,
        redirected_url: &str,
    ) -> Result<Self> {
        let url = Url::parse(redirected_url)?;
        let params: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();

        if let (Some(access_token), Some(refresh_token)) =
            (params.get("access_token"), params.get("refresh_token"))
        {
            return Ok(AuthCredential {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                oauth_root: gateway.oauth_root.clone(),
                user_number: None,
            });
        }

        let (oauth_root, code, user_number) = (
            params
                .get("oauth2_backend_url")
                .cloned()
                .unwrap_or_else(|| gateway.oauth_root.clone()),
            params.get("code").cloned(),
            params.get("user_number").cloned(),
        );
        let code = code.ok_or_else(|| {
            ErrorKind::TokenError("callback URL carried neither token pair nor code".to_string())
        })?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", OAUTH_REDIRECT_URI),
        ];
        let path = format!("{V2_AUTH_PATH}?grant_type=authorization_code&code={code}");
        let timestamp = rfc1123_timestamp();
        let signature = sign_request(&path, &timestamp, crate::gateway::SECURITY_KEY);
        let token_url = format!("{}{}", oauth_root.trim_end_matches('/'), V2_AUTH_PATH);

        let resp: TokenResponse = transport
            .post_form_signed(&token_url, &path, &form, &signature, &timestamp)
            .map_err(|e| Error::from(ErrorKind::TokenError(e.to_string())))?;

        Ok(AuthCredential {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.unwrap_or_default(),
            oauth_root,
            user_number,
        })
    }

    /// POSTs to `member/login` and returns a live [`Session`] plus the
    /// initial device list.
    pub fn start_session(
        &self,
        transport: &Transport,
        gateway: &GatewayEndpoints,
        country: &str,
        language: &str,
    ) -> Result<(Session, Vec<DeviceDescriptor>)> {
        let url = format!("{}/member/login", gateway.api_root.trim_end_matches('/'));
        let body = serde_json::json!({
            "countryCode": country,
            "langCode": language,
            "loginType": "EMP",
            "token": self.access_token,
        });
        let resp: serde_json::Value = transport.post_legacy(
            &url,
            "lgedmRoot",
            &body,
            Some(&self.access_token),
            None,
        )?;
        let session_id = resp
            .get("jsessionId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let devices = resp
            .get("item")
            .cloned()
            .map(normalize_to_list)
            .unwrap_or_default();
        let devices: Vec<DeviceDescriptor> = devices
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        Ok((
            Session::new(
                self.clone(),
                session_id,
                gateway.api_root.clone(),
                gateway.api2_root.clone(),
                country.to_string(),
                language.to_string(),
            ),
            devices,
        ))
    }

    /// Refreshes the access token via a signed request. `refresh_token`
    /// persists unchanged; `access_token` is replaced.
    pub fn refresh(&self, transport: &Transport) -> Result<AuthCredential> {
        let path = format!("{LEGACY_AUTH_PATH}?grant_type=refresh_token");
        let timestamp = rfc1123_timestamp();
        let signature = sign_request(&path, &timestamp, crate::gateway::SECURITY_KEY);
        let url = format!("{}{}", self.oauth_root.trim_end_matches('/'), LEGACY_AUTH_PATH);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
        ];

        let resp: TokenResponse = transport
            .post_form_signed(&url, &path, &form, &signature, &timestamp)
            .map_err(|e| {
                warn!("token refresh against {url} failed: {e}");
                Error::from(ErrorKind::TokenError(e.to_string()))
            })?;

        if resp.access_token.is_empty() {
            error!("token refresh against {url} returned an empty access token");
        }

        Ok(AuthCredential {
            access_token: resp.access_token,
            refresh_token: self.refresh_token.clone(),
            oauth_root: self.oauth_root.clone(),
            user_number: self.user_number.clone(),
        })
    }
}

/// The device list endpoint wraps a singleton device as a bare object
/// rather than a one-element array; normalize both shapes to a `Vec`.
fn normalize_to_list(value: serde_json::Value) -> Vec<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;

    fn test_gateway() -> GatewayEndpoints {
        GatewayEndpoints {
            auth_base: "https://example.com".to_string(),
            api_root: "https://api.example.com".to_string(),
            api2_root: None,
            oauth_root: "https://oauth.example.com".to_string(),
            country: "US".to_string(),
            language: "en-US".to_string(),
        }
    }

    #[test]
    fn parses_legacy_callback() {
        let transport = Transport::new(TransportConfig::default()).unwrap();
        let gw = test_gateway();
        let url = "https://cb.example.com/?access_token=AT1&refresh_token=RT1";
        let cred = AuthCredential::from_callback_url(&transport, &gw, url).unwrap();
        assert_eq!(cred.access_token, "AT1");
        assert_eq!(cred.refresh_token, "RT1");
        assert_eq!(cred.oauth_root, gw.oauth_root);
    }

    #[test]
    fn refresh_rotates_access_token_and_keeps_refresh_token() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"NEW_AT"}"#)
            .create();

        let cred = AuthCredential {
            access_token: "OLD_AT".to_string(),
            refresh_token: "RT_STABLE".to_string(),
            oauth_root: server.url(),
            user_number: None,
        };
        let transport = Transport::new(TransportConfig::default()).unwrap();
        let refreshed = cred.refresh(&transport).unwrap();
        assert_eq!(refreshed.refresh_token, "RT_STABLE");
        assert_ne!(refreshed.access_token, cred.access_token);
        assert_eq!(refreshed.access_token, "NEW_AT");
    }

    #[test]
    fn normalize_singleton_device_to_list() {
        let singleton = serde_json::json!({"deviceId": "a"});
        assert_eq!(normalize_to_list(singleton).len(), 1);
        let list = serde_json::json!([{"deviceId":"a"},{"deviceId":"b"}]);
        assert_eq!(normalize_to_list(list).len(), 2);
    }
}
