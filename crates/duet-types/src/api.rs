use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Timestamps are stored as RFC 3339 with millisecond precision so that
/// string comparison orders them correctly.
pub fn format_datetime(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// -- Queries --

/// One listing predicate. Serialized as the backend's JSON query object.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Equal(String, Value),
    LessThan(String, Value),
    OrderDesc(String),
    OrderAsc(String),
    Limit(u32),
    CursorAfter(String),
}

impl Query {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::Equal(attribute.to_string(), value.into())
    }

    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::LessThan(attribute.to_string(), value.into())
    }

    pub fn order_desc(attribute: &str) -> Self {
        Self::OrderDesc(attribute.to_string())
    }

    pub fn order_asc(attribute: &str) -> Self {
        Self::OrderAsc(attribute.to_string())
    }

    pub fn limit(n: u32) -> Self {
        Self::Limit(n)
    }

    pub fn cursor_after(id: &str) -> Self {
        Self::CursorAfter(id.to_string())
    }

    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Equal(attr, v) => json!({"method": "equal", "attribute": attr, "values": [v]}),
            Self::LessThan(attr, v) => json!({"method": "lessThan", "attribute": attr, "values": [v]}),
            Self::OrderDesc(attr) => json!({"method": "orderDesc", "attribute": attr}),
            Self::OrderAsc(attr) => json!({"method": "orderAsc", "attribute": attr}),
            Self::Limit(n) => json!({"method": "limit", "values": [n]}),
            Self::CursorAfter(id) => json!({"method": "cursorAfter", "values": [id]}),
        };
        value.to_string()
    }
}

// -- Documents --

#[derive(Debug, Deserialize)]
pub struct DocumentList<T> {
    #[serde(default)]
    pub total: u64,
    pub documents: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct CreateDocumentRequest<'a> {
    #[serde(rename = "documentId")]
    pub document_id: &'a str,
    pub data: &'a Value,
}

#[derive(Debug, Serialize)]
pub struct UpdateDocumentRequest<'a> {
    pub data: &'a Value,
}

// -- Messages --

/// Attributes written when a message is sent.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub content: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    pub timestamp: String,
    #[serde(rename = "relationshipId")]
    pub relationship_id: String,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "fileId", skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageEdit {
    pub content: String,
}

// -- Relationships --

#[derive(Debug, Clone, Serialize)]
pub struct NewRelationship {
    #[serde(rename = "husbandId")]
    pub husband_id: Option<String>,
    #[serde(rename = "wifeId")]
    pub wife_id: Option<String>,
    #[serde(rename = "connectionCode")]
    pub connection_code: String,
    #[serde(rename = "relationshipDate")]
    pub relationship_date: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub email: String,
    pub username: String,
    pub avatar: String,
    pub gender: String,
}

// -- Account --

#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountRequest<'a> {
    #[serde(rename = "userId")]
    pub user_id: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailSessionRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "$id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

// -- Storage --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(rename = "sizeOriginal", default)]
    pub size: u64,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: u16,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_json_shapes() {
        assert_eq!(
            Query::equal("relationshipId", "r1").to_json(),
            r#"{"attribute":"relationshipId","method":"equal","values":["r1"]}"#
        );
        assert_eq!(Query::limit(10).to_json(), r#"{"method":"limit","values":[10]}"#);
        assert_eq!(
            Query::cursor_after("m5").to_json(),
            r#"{"method":"cursorAfter","values":["m5"]}"#
        );
        assert_eq!(
            Query::order_desc("$createdAt").to_json(),
            r#"{"attribute":"$createdAt","method":"orderDesc"}"#
        );
    }

    #[test]
    fn datetime_strings_sort_chronologically() {
        let early = format_datetime("2024-01-02T03:04:05Z".parse().unwrap());
        let late = format_datetime("2024-01-02T03:04:05.5Z".parse().unwrap());
        assert_eq!(early, "2024-01-02T03:04:05.000Z");
        assert!(early < late);
    }

    #[test]
    fn new_message_omits_missing_file_id() {
        let msg = NewMessage {
            content: "hi".into(),
            sender_id: "u1".into(),
            timestamp: "2024-01-01T00:00:00.000Z".into(),
            relationship_id: "r1".into(),
            reply_to: None,
            content_type: "text".into(),
            file_id: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("fileId").is_none());
        assert!(value["replyTo"].is_null());
    }
}
