//! Line-oriented wire protocol between the parent process and the broker.
//!
//! Every inbound line is one JSON object:
//!
//! ```text
//! {"id": 7, "script": "a = 2 + 2", "variables": ["a"], "timeout": 1000}
//! ```
//!
//! and every accepted request produces exactly one outbound line, either the
//! requested bindings or an `exception` text, echoing `id` when present.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TimeoutUnit;
use crate::error::Error;
use crate::unit::Bindings;

/// Text of the reply sent for timed-out requests.
pub const TIMEOUT_MESSAGE: &str = "Timeout occurred.";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Int(id) => write!(f, "{id}"),
            RequestId::Str(id) => write!(f, "{id:?}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Option<RequestId>,
    script: String,
    variables: Vec<String>,
    timeout: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<RequestId>,
    pub payload: String,
    pub binding_names: Vec<String>,
    pub timeout: Duration,
}

/// A line that could not be turned into a [`Request`].
#[derive(Debug)]
pub struct Rejected {
    /// Id recovered from the line, if any.
    pub id: Option<RequestId>,
    pub error: Error,
}

impl Request {
    pub fn parse(line: &str, unit: TimeoutUnit) -> Result<Self, Rejected> {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|err| Rejected {
            id: None,
            error: Error::MalformedRequest(err.to_string()),
        })?;

        let id = value
            .get("id")
            .and_then(|id| RequestId::deserialize(id).ok());
        let reject = |message: String| Rejected {
            id: id.clone(),
            error: Error::MalformedRequest(message),
        };

        if !value.is_object() {
            return Err(reject("expected a JSON object".to_string()));
        }

        let raw = RawRequest::deserialize(&value).map_err(|err| reject(err.to_string()))?;
        let timeout = unit
            .to_duration(raw.timeout)
            .ok_or_else(|| reject(format!("invalid timeout {}", raw.timeout)))?;

        Ok(Request {
            id: raw.id,
            payload: raw.script,
            binding_names: raw.variables,
            timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Bindings(Bindings),
    Exception(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: Option<RequestId>,
    pub body: ReplyBody,
}

impl Reply {
    pub fn bindings(id: Option<RequestId>, bindings: Bindings) -> Self {
        Self {
            id,
            body: ReplyBody::Bindings(bindings),
        }
    }

    pub fn exception(id: Option<RequestId>, text: impl Into<String>) -> Self {
        Self {
            id,
            body: ReplyBody::Exception(text.into()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut object = match &self.body {
            ReplyBody::Bindings(bindings) => bindings.clone(),
            ReplyBody::Exception(text) => {
                let mut object = serde_json::Map::new();
                object.insert("exception".to_string(), text.clone().into());
                object
            }
        };
        if let Some(id) = &self.id {
            let id = match id {
                RequestId::Int(id) => serde_json::Value::from(*id),
                RequestId::Str(id) => serde_json::Value::from(id.clone()),
            };
            object.insert("id".to_string(), id);
        }
        serde_json::Value::Object(object)
    }

    /// Compact single-line encoding, without the trailing newline.
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(line: &str) -> Result<Request, Rejected> {
        Request::parse(line, TimeoutUnit::Millis)
    }

    #[test]
    fn test_parse_request() {
        let request =
            parse(r#"{"id": 7, "script": "a = 1", "variables": ["a"], "timeout": 250}"#).unwrap();
        assert_eq!(request.id, Some(RequestId::Int(7)));
        assert_eq!(request.payload, "a = 1");
        assert_eq!(request.binding_names, vec!["a".to_string()]);
        assert_eq!(request.timeout, Duration::from_millis(250));

        let request =
            parse(r#"{"id": "x-1", "script": "", "variables": [], "timeout": 1}"#).unwrap();
        assert_eq!(request.id, Some(RequestId::Str("x-1".into())));
    }

    #[test]
    fn test_id_is_optional() {
        let request = parse(r#"{"script": "a = 1", "variables": [], "timeout": 10}"#).unwrap();
        assert_eq!(request.id, None);
    }

    #[test]
    fn test_timeout_in_seconds() {
        let request = Request::parse(
            r#"{"script": "pass", "variables": [], "timeout": 1.5}"#,
            TimeoutUnit::Seconds,
        )
        .unwrap();
        assert_eq!(request.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_malformed_recovers_id() {
        let rejected = parse(r#"{"id": 3, "script": "a = 1", "timeout": 10}"#).unwrap_err();
        assert_eq!(rejected.id, Some(RequestId::Int(3)));
        assert!(rejected
            .error
            .to_string()
            .contains("missing field `variables`"));

        let rejected =
            parse(r#"{"id": "q", "script": "a", "variables": [], "timeout": 0}"#).unwrap_err();
        assert_eq!(rejected.id, Some(RequestId::Str("q".into())));
        assert_eq!(rejected.error.to_string(), "Malformed request: invalid timeout 0");

        let rejected =
            parse(r#"{"id": 1, "script": 5, "variables": [], "timeout": 10}"#).unwrap_err();
        assert_eq!(rejected.id, Some(RequestId::Int(1)));
    }

    #[test]
    fn test_malformed_without_id() {
        let rejected = parse("not json").unwrap_err();
        assert_eq!(rejected.id, None);
        assert!(matches!(rejected.error, Error::MalformedRequest(_)));

        let rejected = parse("[1, 2]").unwrap_err();
        assert_eq!(rejected.id, None);
    }

    #[test]
    fn test_reply_encoding() {
        let mut bindings = Bindings::new();
        bindings.insert("a".into(), json!(4));
        let reply = Reply::bindings(Some(RequestId::Int(7)), bindings);
        assert_eq!(reply.to_json(), json!({"id": 7, "a": 4}));
        assert!(!reply.to_line().unwrap().contains('\n'));

        let reply = Reply::exception(Some(RequestId::Str("k".into())), TIMEOUT_MESSAGE);
        assert_eq!(
            reply.to_json(),
            json!({"id": "k", "exception": "Timeout occurred."})
        );

        let reply = Reply::exception(None, "boom");
        assert_eq!(reply.to_json(), json!({"exception": "boom"}));
    }
}
