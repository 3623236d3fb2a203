//! Server-side exceptions encoded inside invoke responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Exception payload a hub method returns in place of a result.
///
/// Responses carrying one look like
/// `{"exception": {"type": "...", "message": "...", "details": "..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    /// Server exception type name.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Any other fields the server attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteException {
    pub const NOT_AUTHORIZED: &'static str = "NotAuthorizedException";
    pub const TOKEN_EXPIRED: &'static str = "AuthorizeTokenExpiredException";
    pub const USER_FRIENDLY: &'static str = "UserFriendlyException";
    /// Type used when the payload carries no usable type name.
    pub const GENERIC: &'static str = "Exception";

    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: Some(message.into()),
            details: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Extract the exception embedded in an invoke response, if any.
    ///
    /// A bare string under `exception` becomes a generic exception with that
    /// message; `null` or a missing field means the call succeeded.
    #[must_use]
    pub fn from_response(response: &Value) -> Option<Self> {
        let raw = response.as_object()?.get("exception")?;
        match raw {
            Value::Null => None,
            Value::String(message) => Some(Self::new(Self::GENERIC, message.clone())),
            other => Some(
                serde_json::from_value(other.clone())
                    .unwrap_or_else(|_| Self::new(Self::GENERIC, other.to_string())),
            ),
        }
    }

    /// Session is no longer authorized on the server.
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        self.kind == Self::NOT_AUTHORIZED || self.kind == Self::TOKEN_EXPIRED
    }

    /// Message is meant to be shown to the user.
    #[must_use]
    pub fn is_user_friendly(&self) -> bool {
        self.kind == Self::USER_FRIENDLY
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parses_typed_exception() {
        let response = json!({
            "exception": {
                "type": "UserFriendlyException",
                "message": "Order.NotFound",
                "details": "42",
                "code": 404
            }
        });
        let exception = RemoteException::from_response(&response).unwrap();
        assert!(exception.is_user_friendly());
        assert_eq!(exception.message.as_deref(), Some("Order.NotFound"));
        assert_eq!(exception.details.as_deref(), Some("42"));
        assert_eq!(exception.extra.get("code"), Some(&json!(404)));
    }

    #[test]
    fn test_plain_results_carry_no_exception() {
        assert!(RemoteException::from_response(&json!({"value": 1})).is_none());
        assert!(RemoteException::from_response(&json!({"exception": null})).is_none());
        assert!(RemoteException::from_response(&json!([1, 2])).is_none());
        assert!(RemoteException::from_response(&Value::Null).is_none());
    }

    #[test]
    fn test_untyped_payload_falls_back_to_generic() {
        let exception = RemoteException::from_response(&json!({"exception": "boom"})).unwrap();
        assert_eq!(exception.kind, RemoteException::GENERIC);
        assert_eq!(exception.to_string(), "Exception: boom");

        let exception = RemoteException::from_response(&json!({"exception": {"code": 1}})).unwrap();
        assert_eq!(exception.kind, RemoteException::GENERIC);
    }

    #[test]
    fn test_authorization_failures() {
        assert!(RemoteException::new(RemoteException::TOKEN_EXPIRED, "").is_authorization_failure());
        assert!(RemoteException::new(RemoteException::NOT_AUTHORIZED, "").is_authorization_failure());
        assert!(!RemoteException::new(RemoteException::USER_FRIENDLY, "").is_authorization_failure());
    }
}
