//! Signed REST client.
//!
//! Every request carries the four `OK-ACCESS-*` headers. The signature
//! covers `timestamp + METHOD + path + body`, where `path` includes the
//! query string for GET requests and `body` is the JSON body for POST.
//!
//! Responses share one envelope:
//!
//! ```json
//! {"code": "0", "msg": "", "data": [...]}
//! ```
//!
//! A non-zero `code` is an exchange error even on HTTP 200.

use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RestError;
use crate::infrastructure::metrics;
use crate::infrastructure::okx::auth::{Credentials, TimestampFormat};
use crate::infrastructure::okx::endpoints::REST_BASE;

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Default request timeout.
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Parameters in the query string.
    Get,
    /// Parameters in a JSON body.
    Post,
}

impl HttpMethod {
    /// Upper-case method name, as signed.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
        }
    }
}

/// A REST endpoint. The implementing type holds the request parameters.
pub trait RestRequest: Serialize + Send + Sync {
    /// Element type of the response `data` array.
    type Data: DeserializeOwned + Send;

    /// HTTP method.
    const METHOD: HttpMethod;

    /// Request path, e.g. `/api/v5/public/instruments`.
    const PATH: &'static str;
}

/// REST client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSettings {
    /// Scheme and host, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: REST_BASE.to_string(),
            timeout: DEFAULT_REST_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

/// HTTP client for the OKX REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl RestClient {
    /// Create a new client. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Http`] if the HTTP client cannot be built.
    pub fn new(settings: &RestSettings, credentials: Credentials) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RestError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Execute `request` and return the decoded `data` array.
    ///
    /// # Errors
    ///
    /// [`RestError::HttpStatus`] on a non-success status,
    /// [`RestError::Exchange`] on a non-zero envelope code, or transport,
    /// encoding and decoding errors.
    pub async fn execute<R: RestRequest>(&self, request: &R) -> Result<Vec<R::Data>, RestError> {
        let started = Instant::now();
        let result = self.send(request).await;
        metrics::record_rest_request(R::PATH, result.is_ok(), started.elapsed());
        if let Err(e) = &result {
            tracing::warn!(path = R::PATH, error = %e, "REST request failed");
        }
        result
    }

    async fn send<R: RestRequest>(&self, request: &R) -> Result<Vec<R::Data>, RestError> {
        let (path, body) = match R::METHOD {
            HttpMethod::Get => {
                let query = query_string(request)?;
                let path = if query.is_empty() {
                    R::PATH.to_string()
                } else {
                    format!("{}?{query}", R::PATH)
                };
                (path, String::new())
            }
            HttpMethod::Post => {
                let body =
                    serde_json::to_string(request).map_err(|e| RestError::Encode(e.to_string()))?;
                (R::PATH.to_string(), body)
            }
        };

        let signature = self.credentials.signature(
            R::METHOD.as_str(),
            &path,
            &body,
            TimestampFormat::Iso8601Millis,
        )?;

        let url = format!("{}{path}", self.base_url);
        tracing::debug!(method = R::METHOD.as_str(), %url, "REST request");

        let mut builder = self
            .client
            .request(R::METHOD.into(), &url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, "application/json")
            .header("OK-ACCESS-KEY", self.credentials.api_key())
            .header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase())
            .header("OK-ACCESS-SIGN", &signature.sign)
            .header("OK-ACCESS-TIMESTAMP", &signature.timestamp);
        if self.credentials.is_simulated() {
            builder = builder.header("x-simulated-trading", "1");
        }
        if R::METHOD == HttpMethod::Post {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(RestError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Envelope =
            serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()))?;
        if envelope.code != "0" {
            return Err(RestError::Exchange {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        if envelope.data.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(envelope.data).map_err(|e| RestError::Decode(e.to_string()))
    }
}

/// URL-encode the request's non-empty top-level fields.
fn query_string<R: Serialize>(request: &R) -> Result<String, RestError> {
    let value = serde_json::to_value(request).map_err(|e| RestError::Encode(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(RestError::Encode("GET parameters must be an object".into()));
    };

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        match value {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => {
                query.append_pair(&key, &s);
            }
            other => {
                query.append_pair(&key, &other.to_string());
            }
        }
    }
    Ok(query.finish())
}
