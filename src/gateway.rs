/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Region/language discovery of the API's gateway endpoints.

use crate::error::Result;
use crate::transport::Transport;
use crate::util::random_base64_url_string;
use serde::{Deserialize, Serialize};
use url::Url;

pub const APPLICATION_KEY: &str = "wideq";
pub const SECURITY_KEY: &str = "nuts_securitykey";
pub const SERVICE_CODE: &str = "SVC202";
pub const OAUTH_CLIENT_ID: &str = "LGAO221A02";
pub const OAUTH_REDIRECT_URI: &str = "https://kr.m.lgaccount.com/login/iabClose";

const LEGACY_GATEWAY_URL: &str = "https://kic.lgthinq.com:46030/api/common/gatewayUriList";
const V2_GATEWAY_URL: &str = "https://route.lgthinq.com:46030/v1/service/application/gateway-uri";

const V2_API_KEY: &str = "VGhpblEyLjAgU0VSVklDRQ==";
const V2_CLIENT_ID: &str = "65260af7e8e6547b51fdccf930097c51eb9885a508d3fddfa9ee6cdec22ae1bd";
const V2_MESSAGE_ID: &str = "wideq";
const V2_SERVICE_PHASE: &str = "OP";
const V2_APP_LEVEL: &str = "PRD";
const V2_APP_OS: &str = "LINUX";
const V2_APP_TYPE: &str = "NUTS";
const V2_APP_VER: &str = "3.0.1700";

/// Builds the header set for a v2 (`api2_root`) request, used by the
/// dashboard device-list call. `access_token`/`user_number` are only
/// attached when present, matching the optional `x-emp-token`/`x-user-no`
/// pair.
pub fn v2_headers(
    access_token: Option<&str>,
    user_number: Option<&str>,
    country: &str,
    language: &str,
) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("x-api-key", V2_API_KEY.to_string()),
        ("x-client-id", V2_CLIENT_ID.to_string()),
        ("x-country-code", country.to_string()),
        ("x-language-code", language.to_string()),
        ("x-message-id", V2_MESSAGE_ID.to_string()),
        ("x-service-code", SERVICE_CODE.to_string()),
        ("x-service-phase", V2_SERVICE_PHASE.to_string()),
        ("x-thinq-app-level", V2_APP_LEVEL.to_string()),
        ("x-thinq-app-os", V2_APP_OS.to_string()),
        ("x-thinq-app-type", V2_APP_TYPE.to_string()),
        ("x-thinq-app-ver", V2_APP_VER.to_string()),
        ("x-thinq-security-key", SECURITY_KEY.to_string()),
    ];
    if let Some(token) = access_token {
        headers.push(("x-emp-token", token.to_string()));
    }
    if let Some(user_no) = user_number {
        headers.push(("x-user-no", user_no.to_string()));
    }
    headers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayDiscoveryResponse {
    #[serde(rename = "empUri")]
    emp_uri: Option<String>,
    #[serde(rename = "thinqUri")]
    thinq_uri: Option<String>,
    #[serde(rename = "thinq1Uri")]
    thinq1_uri: Option<String>,
    #[serde(rename = "thinq2Uri")]
    thinq2_uri: Option<String>,
    #[serde(rename = "oauthUri")]
    oauth_uri: Option<String>,
}

/// The region/language-keyed endpoint triple that directs which hosts to call.
///
/// Discovered once per `(country, language)` pair and then held for the
/// lifetime of a [`crate::Client`]; replaced wholesale if the account's
/// region changes. `api2_root` is `None` when the discovery response didn't
/// populate `thinq2Uri`; callers on such a gateway are confined to the
/// legacy RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEndpoints {
    pub auth_base: String,
    pub api_root: String,
    #[serde(default)]
    pub api2_root: Option<String>,
    pub oauth_root: String,
    pub country: String,
    pub language: String,
}

impl GatewayEndpoints {
    /// Issues the discovery request and builds the endpoint triple.
    ///
    /// `api_root` is taken from the legacy (`thinq1Uri`) field, matching
    /// every RPC path in `spec.md` §6 that still addresses the v1 host;
    /// `api2_root` carries `thinq2Uri` separately when the gateway supplies
    /// it, for the handful of v2-only calls (the dashboard device list).
    pub fn discover(transport: &Transport, country: &str, language: &str) -> Result<Self> {
        let mut url = Url::parse(V2_GATEWAY_URL)?;
        url.query_pairs_mut()
            .append_pair("country", country)
            .append_pair("language", language);
        let body: GatewayDiscoveryResponse = transport.get_json(url.as_str(), &[])?;

        let auth_base = body.emp_uri.unwrap_or_default();
        let api_root = body.thinq1_uri.or(body.thinq_uri).unwrap_or_default();
        let oauth_root = body
            .oauth_uri
            .unwrap_or_else(|| auth_base.trim_end_matches('/').to_string());

        Ok(GatewayEndpoints {
            auth_base,
            api_root,
            api2_root: body.thinq2_uri,
            oauth_root,
            country: country.to_string(),
            language: language.to_string(),
        })
    }

    /// Legacy discovery variant, kept for hosts that still answer the older
    /// POST-based `gatewayUriList` endpoint instead of the v2 GET. Never
    /// populates `api2_root`: the legacy endpoint doesn't return `thinq2Uri`.
    pub fn discover_legacy(transport: &Transport, country: &str, language: &str) -> Result<Self> {
        let body = serde_json::json!({ "countryCode": country, "langCode": language });
        let resp: GatewayDiscoveryResponse =
            transport.post_legacy(LEGACY_GATEWAY_URL, "lgedmRoot", &body, None, None)?;

        let auth_base = resp.emp_uri.unwrap_or_default();
        let api_root = resp.thinq1_uri.or(resp.thinq_uri).unwrap_or_default();
        let oauth_root = resp
            .oauth_uri
            .unwrap_or_else(|| auth_base.trim_end_matches('/').to_string());

        Ok(GatewayEndpoints {
            auth_base,
            api_root,
            api2_root: None,
            oauth_root,
            country: country.to_string(),
            language: language.to_string(),
        })
    }

    /// Builds the browser login URL the caller should navigate to.
    ///
    /// The v2 form adds a redirect URI and random `state` the caller can use
    /// to correlate the eventual callback; the legacy form authenticates
    /// directly via a `password`-grant style form.
    pub fn oauth_url(&self) -> Result<Url> {
        let base = self.auth_base.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/spx/login/signIn"))?;
        let state = random_base64_url_string(16)?;
        url.query_pairs_mut()
            .append_pair("country", &self.country)
            .append_pair("language", &self.language)
            .append_pair("svc_code", SERVICE_CODE)
            .append_pair("client_id", OAUTH_CLIENT_ID)
            .append_pair("division", "ha")
            .append_pair("redirect_uri", OAUTH_REDIRECT_URI)
            .append_pair("state", &state)
            .append_pair("show_thirdparty_login", "LGE,MYLG,GGL,AMZ,FBK,APPL");
        Ok(url)
    }

    /// Legacy variant of [`GatewayEndpoints::oauth_url`].
    pub fn oauth_url_legacy(&self) -> Result<Url> {
        let base = self.auth_base.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/login/sign_in"))?;
        url.query_pairs_mut()
            .append_pair("country", &self.country)
            .append_pair("language", &self.language)
            .append_pair("svc_code", SERVICE_CODE)
            .append_pair("client_id", OAUTH_CLIENT_ID)
            .append_pair("division", "ha")
            .append_pair("grant_type", "password");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_extracts_fields_from_fixture() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", mockito::Matcher::Regex(r"^/v1/service/application/gateway-uri.*".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"empUri":"https://no.m.lgaccount.com","thinq1Uri":"https://eic.lgthinq.com:46030/api","oauthUri":"https://no.lgeapi.com"}"#,
            )
            .create();

        // `discover` hits a fixed absolute URL, not the mock server's base,
        // so point the well-known gateway host at the mock via the test
        // transport's base-url override.
        let transport = Transport::new_for_test(&server.url());
        let gw = GatewayEndpoints::discover(&transport, "NO", "en-NO").unwrap();

        assert_eq!(gw.country, "NO");
        assert_eq!(gw.language, "en-NO");
        assert_eq!(gw.auth_base, "https://no.m.lgaccount.com");
        assert_eq!(gw.api_root, "https://eic.lgthinq.com:46030/api");
        assert_eq!(gw.oauth_root, "https://no.lgeapi.com");
    }

    #[test]
    fn oauth_url_carries_required_params() {
        let gw = GatewayEndpoints {
            auth_base: "https://no.m.lgaccount.com".to_string(),
            api_root: "https://eic.lgthinq.com:46030/api".to_string(),
            api2_root: None,
            oauth_root: "https://no.lgeapi.com".to_string(),
            country: "NO".to_string(),
            language: "en-NO".to_string(),
        };
        let url = gw.oauth_url().unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("country").unwrap(), "NO");
        assert_eq!(pairs.get("client_id").unwrap(), OAUTH_CLIENT_ID);
        assert!(pairs.contains_key("state"));
    }
}
