//! OKX Credentials and Request Signing
//!
//! Both the REST API and the streaming login use the same signature:
//!
//! ```text
//! sign = Base64(HMAC-SHA256(secret_key, timestamp + METHOD + request_path + body))
//! ```
//!
//! Only the timestamp rendering differs: REST sends an ISO-8601 UTC string
//! with millisecond precision, streaming login sends Unix epoch seconds.
//!
//! # Streaming Login Flow
//!
//! 1. Connect to the private (or business) endpoint
//! 2. Send `{"op":"login","args":[{"apiKey":..,"passphrase":..,"timestamp":..,"sign":..}]}`
//!    signed over `GET /users/self/verify` with an empty body
//! 3. Receive `{"event":"login","code":"0","msg":""}` or an error event
//!
//! # References
//!
//! - [Authentication](https://www.okx.com/docs-v5/en/#overview-rest-authentication)
//! - [WebSocket Login](https://www.okx.com/docs-v5/en/#overview-websocket-login)

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::messages::{LoginArgs, Request};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Constants
// =============================================================================

/// Default time to wait for a login acknowledgement.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Request path signed by the streaming login.
pub const LOGIN_VERIFY_PATH: &str = "/users/self/verify";

/// Error codes the exchange answers a failed login with.
const LOGIN_FAILURE_CODES: &[&str] = &[
    "60004", "60005", "60006", "60007", "60008", "60009", "60010", "60011", "60022", "60024",
];

/// Whether an error event with `code` answers a login request.
///
/// Other error events (a rejected subscribe, for instance) can arrive while
/// a login is pending and must not settle it.
#[must_use]
pub fn is_login_failure(code: &str) -> bool {
    LOGIN_FAILURE_CODES.contains(&code)
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors from credential construction and signing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A required credential component was empty.
    #[error("{0} cannot be empty")]
    EmptyCredential(&'static str),

    /// The HMAC key was rejected.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

// =============================================================================
// Timestamp Format
// =============================================================================

/// How the signed timestamp is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `2024-01-02T03:04:05.678Z` (REST).
    Iso8601Millis,
    /// `1704164645` (streaming login).
    UnixSeconds,
}

impl TimestampFormat {
    /// Render `at` in this format.
    #[must_use]
    pub fn render(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Iso8601Millis => at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            Self::UnixSeconds => at.timestamp().to_string(),
        }
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Compute the OKX request signature.
///
/// Deterministic: identical inputs always produce identical output.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKey`] if the HMAC key cannot be initialised.
pub fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// A rendered timestamp together with the signature computed over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Timestamp exactly as it was signed.
    pub timestamp: String,
    /// Base64 signature.
    pub sign: String,
}

// =============================================================================
// Credentials
// =============================================================================

struct Secrets {
    api_key: String,
    secret_key: String,
    passphrase: String,
}

/// OKX API credentials.
///
/// Immutable and cheap to clone; shared by the REST client and every
/// streaming connection. `Debug` redacts the secret and passphrase.
#[derive(Clone)]
pub struct Credentials {
    inner: Arc<Secrets>,
    simulated: bool,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is empty.
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        let passphrase = passphrase.into();

        if api_key.is_empty() {
            return Err(AuthError::EmptyCredential("API key"));
        }
        if secret_key.is_empty() {
            return Err(AuthError::EmptyCredential("secret key"));
        }
        if passphrase.is_empty() {
            return Err(AuthError::EmptyCredential("passphrase"));
        }

        Ok(Self {
            inner: Arc::new(Secrets {
                api_key,
                secret_key,
                passphrase,
            }),
            simulated: false,
        })
    }

    /// Target the simulated-trading (demo) environment.
    #[must_use]
    pub const fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.inner.api_key
    }

    /// Get the passphrase.
    #[must_use]
    pub fn passphrase(&self) -> &str {
        &self.inner.passphrase
    }

    /// Whether requests target the simulated-trading environment.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Sign a request at time `at`.
    ///
    /// # Errors
    ///
    /// Propagates [`sign`] failures.
    pub fn signature_at(
        &self,
        method: &str,
        path: &str,
        body: &str,
        format: TimestampFormat,
        at: DateTime<Utc>,
    ) -> Result<Signature, AuthError> {
        let timestamp = format.render(at);
        let sign = sign(&self.inner.secret_key, &timestamp, method, path, body)?;
        Ok(Signature { timestamp, sign })
    }

    /// Sign a request now.
    ///
    /// # Errors
    ///
    /// Propagates [`sign`] failures.
    pub fn signature(
        &self,
        method: &str,
        path: &str,
        body: &str,
        format: TimestampFormat,
    ) -> Result<Signature, AuthError> {
        self.signature_at(method, path, body, format, Utc::now())
    }

    /// Build a streaming login request signed at time `at`.
    ///
    /// # Errors
    ///
    /// Propagates [`sign`] failures.
    pub fn login_request_at(&self, at: DateTime<Utc>) -> Result<Request, AuthError> {
        let Signature { timestamp, sign } = self.signature_at(
            "GET",
            LOGIN_VERIFY_PATH,
            "",
            TimestampFormat::UnixSeconds,
            at,
        )?;
        Ok(Request::login(LoginArgs {
            api_key: self.inner.api_key.clone(),
            passphrase: self.inner.passphrase.clone(),
            timestamp,
            sign,
        }))
    }

    /// Build a streaming login request signed now.
    ///
    /// # Errors
    ///
    /// Propagates [`sign`] failures.
    pub fn login_request(&self) -> Result<Request, AuthError> {
        self.login_request_at(Utc::now())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.inner.api_key)
            .field("secret_key", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .field("simulated", &self.simulated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn creds() -> Credentials {
        Credentials::new("key", "secret", "pass").unwrap()
    }

    #[test_case("60009", true ; "login failed")]
    #[test_case("60024", true ; "wrong passphrase")]
    #[test_case("60018", false ; "unknown channel")]
    #[test_case("60012", false ; "bad request")]
    fn login_failure_codes(code: &str, expected: bool) {
        assert_eq!(is_login_failure(code), expected);
    }

    #[test]
    fn empty_components_are_rejected() {
        assert_eq!(
            Credentials::new("", "s", "p").unwrap_err(),
            AuthError::EmptyCredential("API key")
        );
        assert_eq!(
            Credentials::new("k", "", "p").unwrap_err(),
            AuthError::EmptyCredential("secret key")
        );
        assert_eq!(
            Credentials::new("k", "s", "").unwrap_err(),
            AuthError::EmptyCredential("passphrase")
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let debug = format!("{:?}", creds());
        assert!(debug.contains("key"));
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("pass\""));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn signing_is_deterministic() {
        let a = sign("secret", "1700000000", "GET", "/users/self/verify", "").unwrap();
        let b = sign("secret", "1700000000", "GET", "/users/self/verify", "").unwrap();
        assert_eq!(a, b);

        let other = sign("secret", "1700000001", "GET", "/users/self/verify", "").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn signature_is_base64_of_sha256_mac() {
        let sign = sign("secret", "t", "get", "/p", "").unwrap();
        let decoded = BASE64.decode(sign).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn method_is_uppercased_before_signing() {
        assert_eq!(
            sign("s", "t", "get", "/p", "b").unwrap(),
            sign("s", "t", "GET", "/p", "b").unwrap()
        );
    }

    #[test]
    fn timestamp_formats() {
        let at = Utc.timestamp_millis_opt(1_704_164_645_678).unwrap();
        assert_eq!(
            TimestampFormat::Iso8601Millis.render(at),
            "2024-01-02T03:04:05.678Z"
        );
        assert_eq!(TimestampFormat::UnixSeconds.render(at), "1704164645");
    }

    #[test]
    fn login_request_signs_verify_path_with_unix_seconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let request = creds().login_request_at(at).unwrap();
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();

        assert_eq!(json["op"], "login");
        let args = &json["args"][0];
        assert_eq!(args["apiKey"], "key");
        assert_eq!(args["passphrase"], "pass");
        assert_eq!(args["timestamp"], "1700000000");
        let expected = sign("secret", "1700000000", "GET", LOGIN_VERIFY_PATH, "").unwrap();
        assert_eq!(args["sign"], expected.as_str());
    }
}
