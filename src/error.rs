/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Typed errors for the gateway/auth/session/monitor protocol stack.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// A monitor-protocol error tied to the device and vendor code that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorFailure {
    pub device_id: String,
    pub code: String,
}

impl fmt::Display for MonitorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor error for device {}: {}", self.device_id, self.code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Vendor codes 0102, 9003: the session is no longer authenticated.
    #[error("not logged in (code {0})")]
    NotLoggedIn(String),

    /// Vendor code 0106: the device is unreachable by the cloud.
    #[error("device not connected (code {0})")]
    NotConnected(String),

    /// Vendor code 0100: the requested operation isn't supported for this device/model.
    #[error("request failed (code {0})")]
    FailedRequest(String),

    /// Vendor code 0110: permanent, requires user re-authentication.
    #[error("invalid credential (code {0})")]
    InvalidCredential(String),

    /// Vendor code 9000: malformed request, a caller bug.
    #[error("invalid request (code {0})")]
    InvalidRequest(String),

    /// Token refresh failed outright (non-200 or a success flag of false).
    #[error("token refresh failed: {0}")]
    TokenError(String),

    /// A monitor poll returned a non-recoverable vendor code.
    #[error("{0}")]
    MonitorError(MonitorFailure),

    /// Response failed to parse, even via the documented fallback.
    #[error("malformed response: {reason} (payload: {payload})")]
    MalformedResponse { reason: String, payload: String },

    /// Any other non-"0000"/non-success vendor code.
    #[error("API error {code}: {message}")]
    ApiError { code: String, message: String },

    /// The model schema declares a value type this engine doesn't understand.
    #[error("unsupported value type for '{name}': type={type_name}, descriptor={descriptor}")]
    UnsupportedValueType {
        name: String,
        type_name: String,
        descriptor: String,
    },

    /// `value_spec`/`decode_enum`/`default` looked up a name the schema doesn't declare.
    #[error("unknown value '{0}'")]
    UnknownValue(String),

    /// `encode_enum` was asked to reverse-lookup a label the schema doesn't declare.
    #[error("no such label '{label}' for value '{name}'")]
    NoSuchLabel { name: String, label: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(#[from] std::string::FromUtf8Error),

    #[error("network error: {0}")]
    Request(#[from] reqwest::Error),
}

/// The crate's single error type, wrapping a closed [`ErrorKind`].
///
/// A thin newtype so callers match on `.kind()` rather than on a bare enum.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }
}

macro_rules! impl_from_foreign {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Error {
                fn from(e: $t) -> Error {
                    Error(Box::new(ErrorKind::from(e)))
                }
            }
        )*
    };
}

impl_from_foreign!(
    serde_json::Error,
    url::ParseError,
    base64::DecodeError,
    std::string::FromUtf8Error,
    reqwest::Error,
);

/// Maps a vendor `returnCd`/`resultCode` to a typed [`ErrorKind`].
///
/// Grounded on the original source's `API_ERRORS` table.
pub fn kind_for_code(code: &str, message: &str) -> ErrorKind {
    match code {
        "0102" | "9003" => ErrorKind::NotLoggedIn(code.to_string()),
        "0106" => ErrorKind::NotConnected(code.to_string()),
        "0100" => ErrorKind::FailedRequest(code.to_string()),
        "0110" => ErrorKind::InvalidCredential(code.to_string()),
        "9000" => ErrorKind::InvalidRequest(code.to_string()),
        _ => ErrorKind::ApiError {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}
