use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use duet_backend::{BackendExt, Collection, unique_id};
use duet_types::api::{NewRelationship, Query, format_datetime};
use duet_types::{Gender, Relationship};

use crate::error::PairingError;
use crate::session::Session;

pub const CODE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789@#&*_+-";
pub const GENERATED_CODE_LEN: usize = 8;

fn code_pattern() -> Result<&'static Regex, PairingError> {
    static CODE_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    CODE_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9@#&*_+\-]{8,}$"))
        .as_ref()
        .map_err(|e| PairingError::InvalidCode(e.to_string()))
}

/// A validated connection code. Partners pair by sharing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// At least 8 characters from `A-Z a-z 0-9 @ # & * _ + -`.
    pub fn parse(code: &str) -> Result<Self, PairingError> {
        let code = code.trim();
        if code_pattern()?.is_match(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(PairingError::InvalidCode(format!(
                "'{}' must be at least {} characters of letters, digits or @#&*_+-",
                code, GENERATED_CODE_LEN
            )))
        }
    }

    pub fn generate() -> Self {
        let alphabet = CODE_ALPHABET.as_bytes();
        let mut rng = rand::rng();
        let code = (0..GENERATED_CODE_LEN)
            .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dates a couple can set after pairing. `None` leaves a date unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipDates {
    pub relationship_date: Option<DateTime<Utc>>,
    pub husband_birthday: Option<DateTime<Utc>>,
    pub wife_birthday: Option<DateTime<Utc>>,
}

impl RelationshipDates {
    fn to_patch(&self) -> Value {
        let mut patch = Map::new();
        let fields = [
            ("relationshipDate", self.relationship_date),
            ("husbandBirthday", self.husband_birthday),
            ("wifeBirthday", self.wife_birthday),
        ];
        for (key, date) in fields {
            if let Some(date) = date {
                patch.insert(key.to_string(), Value::String(format_datetime(date)));
            }
        }
        Value::Object(patch)
    }
}

impl Session {
    /// Start a relationship under `code`, taking the slot of this user's
    /// gender.
    pub async fn create_relationship(&mut self, code: &ConnectionCode) -> Result<&Relationship, PairingError> {
        if self.relationship.is_some() {
            return Err(PairingError::AlreadyPaired);
        }

        let user_id = Some(self.user.id.clone());
        let draft = NewRelationship {
            husband_id: if self.user.gender == Gender::Male { user_id.clone() } else { None },
            wife_id: if self.user.gender == Gender::Female { user_id } else { None },
            connection_code: code.as_str().to_string(),
            relationship_date: format_datetime(Utc::now()),
        };
        let relationship: Relationship = self
            .backend
            .create_as(Collection::Relationships, &unique_id(), &draft)
            .await?;
        info!("User {} created relationship {}", self.user.id, relationship.id);

        self.set_relationship_id(Some(&relationship.id)).await?;
        Ok(self.relationship.insert(relationship))
    }

    /// Join the relationship that carries `code`. On any failure the user's
    /// relationship reference is left as it was.
    pub async fn join_relationship(&mut self, code: &ConnectionCode) -> Result<&Relationship, PairingError> {
        if self.relationship.is_some() {
            return Err(PairingError::AlreadyPaired);
        }

        let found: Option<Relationship> = self
            .backend
            .first_as(Collection::Relationships, &[Query::equal("connectionCode", code.as_str())])
            .await?;
        let relationship = found.ok_or(PairingError::NoMatch)?;

        let gender = self.user.gender;
        match relationship.slot(gender) {
            Some(holder) if holder != self.user.id => return Err(PairingError::SlotTaken(gender.slot_attribute())),
            _ => {}
        }

        let mut patch = Map::new();
        patch.insert(gender.slot_attribute().to_string(), Value::String(self.user.id.clone()));
        let joined: Relationship = self
            .backend
            .update_as(Collection::Relationships, &relationship.id, &Value::Object(patch))
            .await?;
        info!("User {} joined relationship {}", self.user.id, joined.id);

        self.set_relationship_id(Some(&joined.id)).await?;
        self.load_relationship().await?;
        self.relationship.as_ref().ok_or(PairingError::NoRelationship)
    }

    /// Remove the relationship document and clear this user's reference.
    pub async fn delete_relationship(&mut self) -> Result<(), PairingError> {
        let relationship = self.relationship.as_ref().ok_or(PairingError::NoRelationship)?;
        self.backend
            .delete_document(Collection::Relationships, &relationship.id)
            .await?;
        info!("Deleted relationship {}", relationship.id);

        self.set_relationship_id(None).await?;
        self.relationship = None;
        self.partner = None;
        Ok(())
    }

    pub async fn update_dates(&mut self, dates: &RelationshipDates) -> Result<&Relationship, PairingError> {
        let id = self
            .relationship
            .as_ref()
            .map(|r| r.id.clone())
            .ok_or(PairingError::NoRelationship)?;
        let updated: Relationship = self
            .backend
            .update_as(Collection::Relationships, &id, &dates.to_patch())
            .await?;
        Ok(self.relationship.insert(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_codes() {
        assert!(ConnectionCode::parse("Ab3@#&*_").is_ok());
        assert!(ConnectionCode::parse("abcdefgh+-longer").is_ok());
        assert_eq!(ConnectionCode::parse("  abcd1234 ").unwrap().as_str(), "abcd1234");
    }

    #[test]
    fn rejects_short_or_foreign_characters() {
        assert!(matches!(ConnectionCode::parse("abc123"), Err(PairingError::InvalidCode(_))));
        assert!(ConnectionCode::parse("abcd 1234").is_err());
        assert!(ConnectionCode::parse("abcd$1234").is_err());
        assert!(ConnectionCode::parse("ábcdefgh").is_err());
    }

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..50 {
            let code = ConnectionCode::generate();
            assert_eq!(code.as_str().len(), GENERATED_CODE_LEN);
            assert!(ConnectionCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn dates_patch_only_set_fields() {
        let dates = RelationshipDates {
            husband_birthday: Some(DateTime::parse_from_rfc3339("1990-04-01T00:00:00Z").unwrap().to_utc()),
            ..RelationshipDates::default()
        };
        let patch = dates.to_patch();
        assert_eq!(patch["husbandBirthday"], "1990-04-01T00:00:00.000Z");
        assert!(patch.get("wifeBirthday").is_none());
    }
}
