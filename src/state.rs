/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Serialization of everything needed to resume a session without
//! re-authenticating: gateway endpoints, the token pair, the session id,
//! and the model-info document cache.

use crate::auth::AuthCredential;
use crate::error::Result;
use crate::gateway::GatewayEndpoints;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The persisted shape of a client, versioned so that a future schema change
/// can add a `V2` variant without breaking callers who dump()'d a `V1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
enum PersistedStateEnvelope {
    V1(PersistedState),
}

/// Everything needed to resume a client session without re-authenticating.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub gateway: Option<GatewayEndpoints>,
    #[serde(default)]
    pub auth: Option<AuthCredential>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Raw model-info documents, keyed by `model_info_url` (not `model_id`,
    /// since the same model id can point at different documents across
    /// regions/firmware revisions).
    #[serde(default)]
    pub model_info_cache: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Serializes a [`PersistedState`] under the current schema version.
pub fn state_to_json(state: &PersistedState) -> Result<String> {
    let envelope = PersistedStateEnvelope::V1(state.clone());
    Ok(serde_json::to_string(&envelope)?)
}

/// Parses a previously-dumped state document. Always upgrades to the
/// current in-memory shape regardless of which schema version was stored.
pub fn state_from_json(json: &str) -> Result<PersistedState> {
    let envelope: PersistedStateEnvelope = serde_json::from_str(json)?;
    Ok(match envelope {
        PersistedStateEnvelope::V1(state) => state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        PersistedState {
            gateway: Some(GatewayEndpoints {
                auth_base: "https://auth.example.com".to_string(),
                api_root: "https://api.example.com".to_string(),
                api2_root: None,
                oauth_root: "https://oauth.example.com".to_string(),
                country: "US".to_string(),
                language: "en-US".to_string(),
            }),
            auth: Some(AuthCredential {
                access_token: "AT".to_string(),
                refresh_token: "RT".to_string(),
                oauth_root: "https://oauth.example.com".to_string(),
                user_number: None,
            }),
            session_id: Some("SESSION1".to_string()),
            model_info_cache: HashMap::new(),
            country: Some("US".to_string()),
            language: Some("en-US".to_string()),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let state = sample();
        let json = state_to_json(&state).unwrap();
        let restored = state_from_json(&json).unwrap();
        assert_eq!(restored.session_id, state.session_id);
        assert_eq!(
            restored.auth.as_ref().unwrap().refresh_token,
            "RT"
        );
    }

    #[test]
    fn missing_optional_fields_default_on_load() {
        let json = r#"{"schema_version":"V1"}"#;
        let restored = state_from_json(json).unwrap();
        assert!(restored.gateway.is_none());
        assert!(restored.auth.is_none());
        assert!(restored.model_info_cache.is_empty());
    }

    #[test]
    fn carries_a_populated_model_info_cache_entry() {
        let mut state = sample();
        state
            .model_info_cache
            .insert("https://example.com/model.json".to_string(), serde_json::json!({"Value": {}}));
        let json = state_to_json(&state).unwrap();
        let restored = state_from_json(&json).unwrap();
        assert_eq!(restored.model_info_cache.len(), 1);
    }
}
