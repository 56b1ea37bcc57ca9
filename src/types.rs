use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::{RequestError, Result, RetryPolicy};

/// Opaque request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Json(value) => serde_json::to_vec(&value)
                .map_err(|err| RequestError::InvalidRequest(format!("unserializable body: {err}"))),
            Self::Text(text) => Ok(text.into_bytes()),
            Self::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Description of one HTTP call.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
    /// Absolute URL, or a path resolved by the transport.
    pub target: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Used by [`RequestExecutor::send`](crate::RequestExecutor::send).
    pub retry_policy: Option<RetryPolicy>,
}

impl RequestSpec {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method,
            headers: Vec::new(),
            body: None,
            timeout_ms: None,
            retry_policy: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(Body::Text(text.into()));
        self
    }

    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(Body::Bytes(bytes.into()));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

/// Completed HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            RequestError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                self.text()
            ))
        })
    }

    pub fn json_value(&self) -> Result<serde_json::Value> {
        self.json()
    }
}

/// Repeated GET of `target` until `predicate` accepts a response.
pub struct PollSession<F> {
    pub target: String,
    pub interval_ms: u64,
    pub predicate: F,
    /// `None` polls until the predicate holds or a fatal error occurs.
    pub max_attempts: Option<usize>,
    /// Statuses that end the poll immediately with an error.
    pub fatal_statuses: Vec<u16>,
}

impl<F> PollSession<F>
where
    F: Fn(&Response) -> bool,
{
    pub fn new(target: impl Into<String>, interval_ms: u64, predicate: F) -> Self {
        Self {
            target: target.into(),
            interval_ms,
            predicate,
            max_attempts: None,
            fatal_statuses: Vec::new(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn fatal_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.fatal_statuses = statuses.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{Body, RequestSpec, Response};

    #[test]
    fn builder_collects_fields() {
        let spec = RequestSpec::post("/items")
            .header("X-Trace", "1")
            .json(json!({"name": "kit"}))
            .timeout_ms(250);
        assert_eq!(spec.method, reqwest::Method::POST);
        assert_eq!(spec.body, Some(Body::Json(json!({"name": "kit"}))));
        assert_eq!(spec.timeout_ms, Some(250));
        assert!(spec.has_header("x-trace"));
        assert!(!spec.has_header("content-type"));
    }

    #[test]
    fn response_json_decodes_typed() {
        #[derive(Deserialize)]
        struct Payload {
            ok: bool,
        }

        let response = Response {
            status: 200,
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body: br#"{"ok":true}"#.to_vec(),
        };
        assert!(response.is_success());
        assert!(response.json::<Payload>().expect("must decode").ok);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn response_json_reports_decode_error() {
        let response = Response {
            status: 200,
            headers: Vec::new(),
            body: b"not json".to_vec(),
        };
        let err = response.json_value().expect_err("must fail");
        assert!(err.to_string().contains("not json"));
    }
}
