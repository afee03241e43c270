use serde::{Deserialize, Serialize};
use skv_types::{KvEntry, SkvError};

pub const MSG_STORED: &str = "success storing data";
pub const MSG_FETCHED: &str = "success fetching data";
pub const MSG_REMOVED: &str = "success removing data";

/// Body of a successful key operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub message: String,
    pub data: StoreData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    pub key: String,
    /// `null` after a delete.
    pub value: Option<String>,
}

impl StoreResponse {
    pub fn stored(key: String, value: String) -> Self {
        StoreResponse { message: MSG_STORED.into(), data: StoreData { key, value: Some(value) } }
    }

    pub fn fetched(entry: KvEntry) -> Self {
        StoreResponse {
            message: MSG_FETCHED.into(),
            data: StoreData { key: entry.key, value: Some(entry.value) },
        }
    }

    pub fn removed(key: String) -> Self {
        StoreResponse { message: MSG_REMOVED.into(), data: StoreData { key, value: None } }
    }
}

/// Body of a failed key operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&SkvError> for ErrorBody {
    fn from(err: &SkvError) -> Self {
        ErrorBody { error: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_body_shape() {
        let body = serde_json::to_value(StoreResponse::stored("foo".into(), "bar".into())).unwrap();
        assert_eq!(
            body,
            json!({ "message": "success storing data", "data": { "key": "foo", "value": "bar" } })
        );
    }

    #[test]
    fn removed_body_has_null_value() {
        let body = serde_json::to_value(StoreResponse::removed("foo".into())).unwrap();
        assert_eq!(
            body,
            json!({ "message": "success removing data", "data": { "key": "foo", "value": null } })
        );
    }

    #[test]
    fn fetched_body_uses_entry() {
        let entry = KvEntry { key: "k".into(), value: "v".into(), version: 4 };
        let resp = StoreResponse::fetched(entry);
        assert_eq!(resp.message, MSG_FETCHED);
        assert_eq!(resp.data.value.as_deref(), Some("v"));
    }

    #[test]
    fn error_body_carries_message() {
        let err = SkvError::NotFound { key: "missing".into() };
        let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(body, json!({ "error": "key 'missing' not found" }));
        assert_eq!(err.http_status(), 422);
    }
}
