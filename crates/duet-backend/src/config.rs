use thiserror::Error;

use duet_types::events::documents_channel;

use crate::Collection;

const DEFAULT_ENDPOINT: &str = "https://cloud.appwrite.io/v1";
const DEFAULT_PLATFORM: &str = "dev.duet.app";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Identifiers of the backend project this client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: String,
    pub project_id: String,
    pub platform: String,
    pub database_id: String,
    pub users_collection_id: String,
    pub relationships_collection_id: String,
    pub messages_collection_id: String,
    pub media_bucket_id: String,
}

impl BackendConfig {
    /// Read `DUET_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let endpoint = lookup("DUET_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.into());
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                var: "DUET_ENDPOINT",
                reason: format!("'{}' is not an http(s) URL", endpoint),
            });
        }

        Ok(Self {
            endpoint,
            project_id: required("DUET_PROJECT_ID")?,
            platform: lookup("DUET_PLATFORM").unwrap_or_else(|| DEFAULT_PLATFORM.into()),
            database_id: required("DUET_DATABASE_ID")?,
            users_collection_id: required("DUET_USERS_COLLECTION_ID")?,
            relationships_collection_id: required("DUET_RELATIONSHIPS_COLLECTION_ID")?,
            messages_collection_id: required("DUET_MESSAGES_COLLECTION_ID")?,
            media_bucket_id: required("DUET_MEDIA_BUCKET_ID")?,
        })
    }

    /// Placeholder identifiers for the in-process backend.
    pub fn local() -> Self {
        Self {
            endpoint: "http://localhost/v1".into(),
            project_id: "local".into(),
            platform: DEFAULT_PLATFORM.into(),
            database_id: "local".into(),
            users_collection_id: "users".into(),
            relationships_collection_id: "relationships".into(),
            messages_collection_id: "messages".into(),
            media_bucket_id: "media".into(),
        }
    }

    pub fn collection_id(&self, collection: Collection) -> &str {
        match collection {
            Collection::Users => &self.users_collection_id,
            Collection::Relationships => &self.relationships_collection_id,
            Collection::Messages => &self.messages_collection_id,
        }
    }

    pub fn channel(&self, collection: Collection) -> String {
        documents_channel(&self.database_id, self.collection_id(collection))
    }

    /// Public view URL of a file in the media bucket.
    pub fn file_view_url(&self, file_id: &str) -> String {
        format!(
            "{}/storage/buckets/{}/files/{}/view?project={}",
            self.endpoint, self.media_bucket_id, file_id, self.project_id
        )
    }

    pub fn realtime_url(&self, channels: &[&str]) -> String {
        let base = if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.endpoint.clone()
        };

        let mut url = format!("{}/realtime?project={}", base, self.project_id);
        for channel in channels {
            url.push_str("&channels[]=");
            url.push_str(channel);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars() -> HashMap<&'static str, String> {
        [
            ("DUET_PROJECT_ID", "proj"),
            ("DUET_DATABASE_ID", "db"),
            ("DUET_USERS_COLLECTION_ID", "users"),
            ("DUET_RELATIONSHIPS_COLLECTION_ID", "rels"),
            ("DUET_MESSAGES_COLLECTION_ID", "msgs"),
            ("DUET_MEDIA_BUCKET_ID", "media"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    #[test]
    fn defaults_endpoint_and_builds_urls() {
        let env = vars();
        let config = BackendConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(
            config.file_view_url("f1"),
            "https://cloud.appwrite.io/v1/storage/buckets/media/files/f1/view?project=proj"
        );
        assert_eq!(
            config.channel(Collection::Messages),
            "databases.db.collections.msgs.documents"
        );
        assert_eq!(
            config.realtime_url(&["a.b"]),
            "wss://cloud.appwrite.io/v1/realtime?project=proj&channels[]=a.b"
        );
    }

    #[test]
    fn missing_and_invalid_values() {
        let mut env = vars();
        env.remove("DUET_MEDIA_BUCKET_ID");
        let err = BackendConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DUET_MEDIA_BUCKET_ID")));

        let mut env = vars();
        env.insert("DUET_ENDPOINT", "ftp://nope".into());
        let err = BackendConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DUET_ENDPOINT", .. }));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let mut env = vars();
        env.insert("DUET_ENDPOINT", "http://localhost:8080/v1/".into());
        let config = BackendConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.endpoint, "http://localhost:8080/v1");
        assert!(config.realtime_url(&[]).starts_with("ws://localhost:8080/v1/realtime"));
    }
}
