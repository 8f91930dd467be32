use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Messages --

/// A chat message document. Field names on the wire follow the backend
/// (`$id`, camelCase attributes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$createdAt")]
    pub created_at: DateTime<Utc>,
    pub content: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "replyTo", default)]
    pub reply_to: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: ContentType,
    #[serde(rename = "relationshipId")]
    pub relationship_id: String,
    /// Storage file backing an uploaded attachment. Older documents only carry
    /// the id inside the content URL.
    #[serde(rename = "fileId", default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl Message {
    pub fn category(&self) -> ContentCategory {
        self.content_type.category()
    }

    /// The media bucket file this message owns, if any. An explicit `fileId`
    /// always wins; otherwise only stored attachment categories are parsed.
    pub fn stored_file_id(&self) -> Option<String> {
        if let Some(id) = &self.file_id {
            return Some(id.clone());
        }
        if !self.category().is_stored_attachment() {
            return None;
        }
        extract_file_id(&self.content).map(str::to_owned)
    }
}

/// Pull the file id out of a storage view URL (`.../files/<id>/view?...`).
pub fn extract_file_id(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("files/")?;
    let (id, _) = rest.split_once('/')?;
    if id.is_empty() { None } else { Some(id) }
}

/// Raw content-type tag: `text`, `gif`, or a MIME type such as `image/png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub const TEXT: &'static str = "text";
    pub const GIF: &'static str = "gif";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn text() -> Self {
        Self(Self::TEXT.to_string())
    }

    pub fn gif() -> Self {
        Self(Self::GIF.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> ContentCategory {
        const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
        const VIDEO: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

        let tag = self.0.trim();
        if tag.eq_ignore_ascii_case(Self::TEXT) {
            return ContentCategory::Text;
        }
        // The picker's own tag: an external GIF link, nothing in storage.
        if tag.eq_ignore_ascii_case(Self::GIF) {
            return ContentCategory::Gif;
        }

        let ext = match tag.split_once('/') {
            Some((_, sub)) if !sub.is_empty() => sub.to_ascii_lowercase(),
            _ => tag.to_ascii_lowercase(),
        };
        if IMAGE.contains(&ext.as_str()) {
            ContentCategory::Image
        } else if VIDEO.contains(&ext.as_str()) {
            ContentCategory::Video
        } else {
            ContentCategory::Unknown
        }
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::text()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Text,
    Gif,
    Image,
    Video,
    Unknown,
}

impl ContentCategory {
    /// Rendered as media rather than text.
    pub fn is_attachment(self) -> bool {
        matches!(self, Self::Gif | Self::Image | Self::Video)
    }

    /// Content lives in the media bucket and must be deleted with the message.
    pub fn is_stored_attachment(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

// -- Relationships --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }

    /// Relationship attribute holding this partner's user id.
    pub fn slot_attribute(self) -> &'static str {
        match self {
            Self::Male => "husbandId",
            Self::Female => "wifeId",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "husbandId", default)]
    pub husband_id: Option<String>,
    #[serde(rename = "wifeId", default)]
    pub wife_id: Option<String>,
    #[serde(rename = "connectionCode")]
    pub connection_code: String,
    #[serde(rename = "relationshipDate", default)]
    pub relationship_date: Option<DateTime<Utc>>,
    #[serde(rename = "husbandBirthday", default)]
    pub husband_birthday: Option<DateTime<Utc>>,
    #[serde(rename = "wifeBirthday", default)]
    pub wife_birthday: Option<DateTime<Utc>>,
}

impl Relationship {
    /// Both partners have joined.
    pub fn is_complete(&self) -> bool {
        self.husband_id.is_some() && self.wife_id.is_some()
    }

    pub fn slot(&self, gender: Gender) -> Option<&str> {
        match gender {
            Gender::Male => self.husband_id.as_deref(),
            Gender::Female => self.wife_id.as_deref(),
        }
    }

    /// The other participant's user id.
    pub fn partner_of(&self, user_id: &str) -> Option<&str> {
        if self.husband_id.as_deref() == Some(user_id) {
            self.wife_id.as_deref()
        } else {
            self.husband_id.as_deref()
        }
    }
}

// -- Users --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    pub gender: Gender,
    #[serde(rename = "relationshipId", default)]
    pub relationship_id: Option<String>,
    /// Serialized device telemetry, replaced wholesale on every push.
    #[serde(default)]
    pub info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_mime_subtype() {
        assert_eq!(ContentType::new("image/png").category(), ContentCategory::Image);
        assert_eq!(ContentType::new("image/JPEG").category(), ContentCategory::Image);
        assert_eq!(ContentType::new("image/gif").category(), ContentCategory::Image);
        assert_eq!(ContentType::new("video/quicktime").category(), ContentCategory::Unknown);
        assert_eq!(ContentType::new("video/mp4").category(), ContentCategory::Video);
        assert_eq!(ContentType::new("mov").category(), ContentCategory::Video);
        assert_eq!(ContentType::gif().category(), ContentCategory::Gif);
        assert_eq!(ContentType::text().category(), ContentCategory::Text);
        assert_eq!(ContentType::new("application/pdf").category(), ContentCategory::Unknown);
    }

    #[test]
    fn gif_is_attachment_but_not_stored() {
        let gif = ContentCategory::Gif;
        assert!(gif.is_attachment());
        assert!(!gif.is_stored_attachment());
        assert!(ContentCategory::Video.is_stored_attachment());
        assert!(!ContentCategory::Text.is_attachment());
    }

    #[test]
    fn file_id_from_view_url() {
        let url = "https://cloud.example/v1/storage/buckets/media/files/abc123/view?project=p1";
        assert_eq!(extract_file_id(url), Some("abc123"));
        assert_eq!(extract_file_id("https://media.tenor.com/x.gif"), None);
        assert_eq!(extract_file_id("files//view"), None);
    }

    #[test]
    fn message_prefers_structured_file_id() {
        let json = serde_json::json!({
            "$id": "m1",
            "$createdAt": "2024-07-15T10:00:00.000+00:00",
            "content": "https://h/v1/storage/buckets/b/files/fromurl/view?project=p",
            "senderId": "u1",
            "timestamp": "2024-07-15T10:00:00.000Z",
            "replyTo": null,
            "contentType": "image/png",
            "relationshipId": "r1",
            "fileId": "structured"
        });
        let mut msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.stored_file_id().as_deref(), Some("structured"));

        msg.file_id = None;
        assert_eq!(msg.stored_file_id().as_deref(), Some("fromurl"));

        msg.content_type = ContentType::text();
        assert_eq!(msg.stored_file_id(), None);
    }

    #[test]
    fn relationship_completeness_and_partner() {
        let mut rel = Relationship {
            id: "r1".into(),
            husband_id: Some("h".into()),
            wife_id: None,
            connection_code: "ABCDEFGH".into(),
            relationship_date: None,
            husband_birthday: None,
            wife_birthday: None,
        };
        assert!(!rel.is_complete());
        assert_eq!(rel.partner_of("h"), None);

        rel.wife_id = Some("w".into());
        assert!(rel.is_complete());
        assert_eq!(rel.partner_of("h"), Some("w"));
        assert_eq!(rel.partner_of("w"), Some("h"));
        assert_eq!(rel.slot(Gender::Female), Some("w"));
    }
}
