//! Client side of the hosted backend: documents, file storage, accounts and
//! realtime change feeds.
//!
//! [`Backend`] is the seam the rest of the workspace programs against.
//! [`rest::RestBackend`] speaks the hosted REST/WebSocket API;
//! [`memory::MemoryBackend`] keeps everything in process for offline runs
//! and tests.

pub mod config;
pub mod error;
pub mod memory;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use duet_types::api::{Account, Query, StoredFile};

pub use config::{BackendConfig, ConfigError};
pub use error::{BackendError, Result};
pub use memory::{MemoryBackend, MemorySnapshot};
pub use realtime::Subscription;
pub use rest::RestBackend;

/// Collections the app stores documents in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Relationships,
    Messages,
}

/// A file to be stored in the media bucket.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Fresh document/file id accepted by the backend (36 chars max, alphanumeric).
pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[async_trait]
pub trait Backend: Send + Sync {
    // -- Documents --

    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Value>>;

    async fn create_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value>;

    /// Patch the listed attributes; others are left as they are.
    async fn update_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value>;

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()>;

    // -- Media bucket --

    async fn create_file(&self, file_id: &str, upload: FileUpload) -> Result<StoredFile>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    fn file_view_url(&self, file_id: &str) -> String;

    // -- Realtime --

    /// Open a change feed for one collection. Dropping the subscription
    /// closes it.
    async fn subscribe(&self, collection: Collection) -> Result<Subscription>;

    // -- Account --

    async fn create_account(&self, user_id: &str, email: &str, password: &str, name: &str) -> Result<Account>;

    async fn create_email_session(&self, email: &str, password: &str) -> Result<()>;

    /// `None` when no session is active.
    async fn current_account(&self) -> Result<Option<Account>>;

    async fn delete_current_session(&self) -> Result<()>;

    fn initials_avatar_url(&self, name: &str) -> String;
}

/// Typed helpers over the raw JSON document calls.
#[async_trait]
pub trait BackendExt: Backend {
    async fn list_as<T>(&self, collection: Collection, queries: &[Query]) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let docs = self.list_documents(collection, queries).await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d).map_err(BackendError::from))
            .collect()
    }

    async fn first_as<T>(&self, collection: Collection, queries: &[Query]) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut found: Vec<T> = self.list_as(collection, queries).await?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    async fn create_as<T, D>(&self, collection: Collection, document_id: &str, data: &D) -> Result<T>
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync,
    {
        let data = serde_json::to_value(data)?;
        let doc = self.create_document(collection, document_id, data).await?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn update_as<T, D>(&self, collection: Collection, document_id: &str, data: &D) -> Result<T>
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync,
    {
        let data = serde_json::to_value(data)?;
        let doc = self.update_document(collection, document_id, data).await?;
        Ok(serde_json::from_value(doc)?)
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}
