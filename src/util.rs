/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Small helpers shared across the transport, signature and auth modules.

use crate::error::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use lazy_static::lazy_static;
use ring::rand::{SecureRandom, SystemRandom};

lazy_static! {
    static ref RNG: SystemRandom = SystemRandom::new();
}

/// RFC 1123-style timestamp, e.g. `Tue, 15 Nov 1994 08:12:31 +0000`.
///
/// This is the exact format the gateway expects in the signed
/// `path\ntimestamp` message for token refresh requests.
pub fn rfc1123_timestamp() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

/// A random URL-safe base64 string of `len` raw bytes, used for OAuth `state` values.
pub fn random_base64_url_string(len: usize) -> Result<String> {
    let mut out = vec![0u8; len];
    RNG.fill(&mut out)
        .map_err(|_| crate::error::ErrorKind::TokenError("RNG failure".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = rfc1123_timestamp();
        // e.g. "Mon, 02 Jan 2006 15:04:05 +0000"
        assert!(ts.ends_with("+0000"));
        assert_eq!(ts.len(), 29);
    }

    #[test]
    fn random_string_is_url_safe_and_right_length() {
        let s = random_base64_url_string(16).unwrap();
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
