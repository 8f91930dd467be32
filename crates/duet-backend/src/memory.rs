use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use duet_types::api::{Account, Query, StoredFile, format_datetime};
use duet_types::events::{ChangeAction, RealtimeEvent};

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::realtime::Subscription;
use crate::{Backend, Collection, FileUpload};

/// Page size the hosted backend applies when a listing carries no limit.
const DEFAULT_LIST_LIMIT: usize = 25;

/// A backend call as observed by [`MemoryBackend`]. Used to assert which
/// requests an operation issued, and to inject failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDocuments(Collection),
    CreateDocument(Collection),
    UpdateDocument(Collection, String),
    DeleteDocument(Collection, String),
    CreateFile(String),
    DeleteFile(String),
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredBlob {
    file: StoredFile,
    bytes: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
struct AccountRow {
    account: Account,
    password: String,
}

/// Everything a [`MemoryBackend`] stores, in a serialisable form. Lets a
/// short-lived process hand its state to the next one.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    users: Vec<Value>,
    #[serde(default)]
    relationships: Vec<Value>,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    files: Vec<StoredBlob>,
    #[serde(default)]
    accounts: Vec<AccountRow>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<Collection, Vec<Value>>,
    files: HashMap<String, StoredBlob>,
    accounts: Vec<AccountRow>,
    session: Option<String>,
    calls: Vec<Call>,
    failures: Vec<Call>,
    last_stamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Record the call; fail it if a matching failure was queued.
    fn record(&mut self, call: Call) -> Result<()> {
        self.calls.push(call.clone());
        if let Some(pos) = self.failures.iter().position(|f| *f == call) {
            self.failures.remove(pos);
            return Err(BackendError::Api {
                status: 500,
                message: format!("injected failure for {:?}", call),
            });
        }
        Ok(())
    }

    /// Strictly increasing creation stamps, millisecond precision.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(3);
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn collection(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.documents.entry(collection).or_default()
    }
}

/// In-process backend with the same listing, change-feed and account
/// semantics as the hosted one. Nothing is persisted.
pub struct MemoryBackend {
    config: BackendConfig,
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<(Collection, RealtimeEvent)>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_config(BackendConfig::local())
    }

    pub fn with_config(config: BackendConfig) -> Self {
        let (changes, _) = broadcast::channel(1024);
        info!("Using in-memory backend");
        Self {
            config,
            state: Mutex::new(MemoryState::default()),
            changes,
        }
    }

    /// Rebuild a backend from a [`snapshot`](Self::snapshot). The call log
    /// and queued failures start empty.
    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let backend = Self::new();
        let _ = backend.with_state(|state| {
            state.documents.insert(Collection::Users, snapshot.users);
            state.documents.insert(Collection::Relationships, snapshot.relationships);
            state.documents.insert(Collection::Messages, snapshot.messages);
            state.files = snapshot
                .files
                .into_iter()
                .map(|blob| (blob.file.id.clone(), blob))
                .collect();
            state.accounts = snapshot.accounts;
            state.session = snapshot.session;
            state.last_stamp = state
                .documents
                .values()
                .flatten()
                .flat_map(|doc| ["$createdAt", "$updatedAt"].map(|key| doc.get(key).and_then(Value::as_str)))
                .flatten()
                .filter_map(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
                .map(|stamp| stamp.with_timezone(&Utc))
                .max();
            Ok(())
        });
        backend
    }

    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        self.with_state(|state| {
            let mut files: Vec<StoredBlob> = state.files.values().cloned().collect();
            files.sort_by(|a, b| a.file.id.cmp(&b.file.id));
            Ok(MemorySnapshot {
                users: state.collection(Collection::Users).clone(),
                relationships: state.collection(Collection::Relationships).clone(),
                messages: state.collection(Collection::Messages).clone(),
                files,
                accounts: state.accounts.clone(),
                session: state.session.clone(),
            })
        })
    }

    fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryState) -> Result<T>,
    {
        let mut state = self.state.lock().map_err(|e| BackendError::Api {
            status: 500,
            message: format!("memory backend lock poisoned: {}", e),
        })?;
        f(&mut state)
    }

    fn publish(&self, collection: Collection, action: ChangeAction, doc: Value) {
        let channel = self.config.channel(collection);
        let event = RealtimeEvent::for_document(&channel, action, doc);
        // No subscribers is fine
        let _ = self.changes.send((collection, event));
    }

    /// Insert a document exactly as given, keeping any `$createdAt`. No
    /// change event is emitted and no call is recorded.
    pub fn seed_document(&self, collection: Collection, doc: Value) -> Result<()> {
        let Value::Object(mut fields) = doc else {
            return Err(BackendError::InvalidRequest("document must be an object".into()));
        };
        self.with_state(|state| {
            if !fields.contains_key("$id") {
                fields.insert("$id".into(), Value::String(crate::unique_id()));
            }
            if !fields.contains_key("$createdAt") {
                let stamp = format_datetime(state.next_stamp());
                fields.insert("$createdAt".into(), Value::String(stamp.clone()));
                fields.insert("$updatedAt".into(), Value::String(stamp));
            }
            state.collection(collection).push(Value::Object(fields));
            Ok(())
        })
    }

    /// Make the next call equal to `call` fail with a 500.
    pub fn fail_next(&self, call: Call) {
        let _ = self.with_state(|state| {
            state.failures.push(call);
            Ok(())
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|state| Ok(state.calls.clone())).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        let _ = self.with_state(|state| {
            state.calls.clear();
            Ok(())
        });
    }

    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.with_state(|state| Ok(state.collection(collection).clone()))
            .unwrap_or_default()
    }

    pub fn has_file(&self, file_id: &str) -> bool {
        self.file_bytes(file_id).is_some()
    }

    pub fn file_bytes(&self, file_id: &str) -> Option<Vec<u8>> {
        self.with_state(|state| Ok(state.files.get(file_id).map(|blob| blob.bytes.clone())))
            .ok()
            .flatten()
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), Some(v)) if !v.is_null() => Ordering::Less,
        (Some(v), None | Some(Value::Null)) if !v.is_null() => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn document_id(doc: &Value) -> Option<&str> {
    doc.get("$id").and_then(Value::as_str)
}

/// Filter, order, page. Mirrors the hosted backend's listing rules.
fn run_queries(docs: &[Value], queries: &[Query]) -> Result<Vec<Value>> {
    let mut matched: Vec<&Value> = docs
        .iter()
        .filter(|doc| {
            queries.iter().all(|q| match q {
                Query::Equal(attr, v) => doc.get(attr) == Some(v),
                Query::LessThan(attr, v) => {
                    doc.get(attr).is_some_and(|field| !field.is_null())
                        && compare_values(doc.get(attr), Some(v)) == Ordering::Less
                }
                _ => true,
            })
        })
        .collect();

    for q in queries {
        match q {
            Query::OrderAsc(attr) => matched.sort_by(|a, b| compare_values(a.get(attr), b.get(attr))),
            Query::OrderDesc(attr) => matched.sort_by(|a, b| compare_values(b.get(attr), a.get(attr))),
            _ => {}
        }
    }

    let mut start = 0;
    for q in queries {
        if let Query::CursorAfter(id) = q {
            let pos = matched
                .iter()
                .position(|doc| document_id(doc) == Some(id.as_str()))
                .ok_or_else(|| BackendError::Api {
                    status: 400,
                    message: format!("Document '{}' for the 'cursor' value not found.", id),
                })?;
            start = pos + 1;
        }
    }

    let limit = queries
        .iter()
        .rev()
        .find_map(|q| match q {
            Query::Limit(n) => Some(*n as usize),
            _ => None,
        })
        .unwrap_or(DEFAULT_LIST_LIMIT);

    Ok(matched.into_iter().skip(start).take(limit).cloned().collect())
}

fn merge_fields(target: &mut Map<String, Value>, data: Value) -> Result<()> {
    let Value::Object(fields) = data else {
        return Err(BackendError::InvalidRequest("document data must be an object".into()));
    };
    for (key, value) in fields {
        if key.starts_with('$') {
            continue;
        }
        target.insert(key, value);
    }
    Ok(())
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Value>> {
        self.with_state(|state| {
            state.record(Call::ListDocuments(collection))?;
            run_queries(state.collection(collection), queries)
        })
    }

    async fn create_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value> {
        let doc = self.with_state(|state| {
            state.record(Call::CreateDocument(collection))?;
            if state
                .collection(collection)
                .iter()
                .any(|d| crate::memory::document_id(d) == Some(document_id))
            {
                return Err(BackendError::Conflict(format!(
                    "Document with the requested ID '{}' already exists.",
                    document_id
                )));
            }

            let stamp = format_datetime(state.next_stamp());
            let mut fields = Map::new();
            fields.insert("$id".into(), Value::String(document_id.to_string()));
            fields.insert("$createdAt".into(), Value::String(stamp.clone()));
            fields.insert("$updatedAt".into(), Value::String(stamp));
            merge_fields(&mut fields, data)?;

            let doc = Value::Object(fields);
            state.collection(collection).push(doc.clone());
            Ok(doc)
        })?;

        debug!("Created {:?} document {}", collection, document_id);
        self.publish(collection, ChangeAction::Create, doc.clone());
        Ok(doc)
    }

    async fn update_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value> {
        let doc = self.with_state(|state| {
            state.record(Call::UpdateDocument(collection, document_id.to_string()))?;
            let stamp = format_datetime(state.next_stamp());
            let doc = state
                .collection(collection)
                .iter_mut()
                .find(|d| crate::memory::document_id(d) == Some(document_id))
                .ok_or_else(|| BackendError::NotFound(format!("Document '{}' not found", document_id)))?;

            if let Some(fields) = doc.as_object_mut() {
                merge_fields(fields, data)?;
                fields.insert("$updatedAt".into(), Value::String(stamp));
            }
            Ok(doc.clone())
        })?;

        self.publish(collection, ChangeAction::Update, doc.clone());
        Ok(doc)
    }

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()> {
        let removed = self.with_state(|state| {
            state.record(Call::DeleteDocument(collection, document_id.to_string()))?;
            let docs = state.collection(collection);
            let pos = docs
                .iter()
                .position(|d| crate::memory::document_id(d) == Some(document_id))
                .ok_or_else(|| BackendError::NotFound(format!("Document '{}' not found", document_id)))?;
            Ok(docs.remove(pos))
        })?;

        self.publish(collection, ChangeAction::Delete, removed);
        Ok(())
    }

    async fn create_file(&self, file_id: &str, upload: FileUpload) -> Result<StoredFile> {
        self.with_state(|state| {
            state.record(Call::CreateFile(file_id.to_string()))?;
            if upload.bytes.is_empty() {
                return Err(BackendError::InvalidRequest("empty upload".into()));
            }
            if state.files.contains_key(file_id) {
                return Err(BackendError::Conflict(format!("File '{}' already exists", file_id)));
            }
            let file = StoredFile {
                id: file_id.to_string(),
                name: upload.file_name,
                mime_type: upload.mime_type,
                size: upload.bytes.len() as u64,
            };
            state.files.insert(
                file_id.to_string(),
                StoredBlob { file: file.clone(), bytes: upload.bytes },
            );
            Ok(file)
        })
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.with_state(|state| {
            state.record(Call::DeleteFile(file_id.to_string()))?;
            let blob = state
                .files
                .remove(file_id)
                .ok_or_else(|| BackendError::NotFound(format!("File '{}' not found", file_id)))?;
            debug!("Deleted file {} ({} bytes)", blob.file.id, blob.file.size);
            Ok(())
        })
    }

    fn file_view_url(&self, file_id: &str) -> String {
        self.config.file_view_url(file_id)
    }

    async fn subscribe(&self, collection: Collection) -> Result<Subscription> {
        let channel = self.config.channel(collection);
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(256);

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok((source, event)) => {
                        if source != collection {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Change feed lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::from_parts(channel, rx, task))
    }

    async fn create_account(&self, user_id: &str, email: &str, password: &str, name: &str) -> Result<Account> {
        self.with_state(|state| {
            if state.accounts.iter().any(|row| row.account.email == email) {
                return Err(BackendError::Conflict(
                    "A user with the same id, email, or phone already exists in this project.".into(),
                ));
            }
            let account = Account {
                id: user_id.to_string(),
                email: email.to_string(),
                name: name.to_string(),
            };
            state.accounts.push(AccountRow {
                account: account.clone(),
                password: password.to_string(),
            });
            Ok(account)
        })
    }

    async fn create_email_session(&self, email: &str, password: &str) -> Result<()> {
        self.with_state(|state| {
            let id = state
                .accounts
                .iter()
                .find(|row| row.account.email == email && row.password == password)
                .map(|row| row.account.id.clone())
                .ok_or_else(|| {
                    BackendError::Unauthorized(
                        "Invalid credentials. Please check the email and password.".into(),
                    )
                })?;
            state.session = Some(id);
            Ok(())
        })
    }

    async fn current_account(&self) -> Result<Option<Account>> {
        self.with_state(|state| {
            let Some(id) = &state.session else {
                return Ok(None);
            };
            Ok(state
                .accounts
                .iter()
                .find(|row| &row.account.id == id)
                .map(|row| row.account.clone()))
        })
    }

    async fn delete_current_session(&self) -> Result<()> {
        self.with_state(|state| {
            state
                .session
                .take()
                .map(|_| ())
                .ok_or_else(|| BackendError::Unauthorized("No active session".into()))
        })
    }

    fn initials_avatar_url(&self, name: &str) -> String {
        format!(
            "{}/avatars/initials?name={}&project={}",
            self.config.endpoint,
            name.replace(' ', "+"),
            self.config.project_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(docs: &[Value]) -> Vec<&str> {
        docs.iter().filter_map(document_id).collect()
    }

    #[test]
    fn listing_filters_orders_and_pages() {
        let docs = vec![
            json!({"$id": "a", "$createdAt": "2024-01-01T00:00:01.000Z", "rel": "r1"}),
            json!({"$id": "b", "$createdAt": "2024-01-01T00:00:02.000Z", "rel": "r2"}),
            json!({"$id": "c", "$createdAt": "2024-01-01T00:00:03.000Z", "rel": "r1"}),
            json!({"$id": "d", "$createdAt": "2024-01-01T00:00:04.000Z", "rel": "r1"}),
        ];
        let page = run_queries(
            &docs,
            &[Query::equal("rel", "r1"), Query::order_desc("$createdAt"), Query::limit(2)],
        )
        .unwrap();
        assert_eq!(ids(&page), vec!["d", "c"]);

        let next = run_queries(
            &docs,
            &[
                Query::equal("rel", "r1"),
                Query::order_desc("$createdAt"),
                Query::limit(2),
                Query::cursor_after("c"),
            ],
        )
        .unwrap();
        assert_eq!(ids(&next), vec!["a"]);

        let older = run_queries(&docs, &[Query::less_than("$createdAt", "2024-01-01T00:00:03.000Z")]).unwrap();
        assert_eq!(ids(&older), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn snapshot_carries_state_to_a_new_backend() {
        let backend = MemoryBackend::new();
        let account = backend
            .create_account("acc1", "ada@example.com", "correct horse", "Ada")
            .await
            .unwrap();
        backend.create_email_session("ada@example.com", "correct horse").await.unwrap();
        backend
            .create_document(Collection::Users, "u1", json!({"accountId": account.id}))
            .await
            .unwrap();
        backend
            .create_file(
                "f1",
                FileUpload {
                    file_name: "a.jpg".into(),
                    mime_type: "image/jpeg".into(),
                    bytes: vec![1, 2, 3],
                },
            )
            .await
            .unwrap();

        let text = serde_json::to_string(&backend.snapshot().unwrap()).unwrap();
        let restored = MemoryBackend::from_snapshot(serde_json::from_str(&text).unwrap());

        assert_eq!(restored.current_account().await.unwrap(), Some(account));
        assert_eq!(restored.documents(Collection::Users), backend.documents(Collection::Users));
        assert_eq!(restored.file_bytes("f1"), Some(vec![1, 2, 3]));
        assert!(restored.calls().is_empty());

        // Stamps keep increasing after a restore
        let doc = restored
            .create_document(Collection::Users, "u2", json!({}))
            .await
            .unwrap();
        let first = restored.documents(Collection::Users)[0]["$createdAt"].clone();
        assert!(doc["$createdAt"].as_str() > first.as_str());
    }

    #[test]
    fn unknown_cursor_is_rejected() {
        let docs = vec![json!({"$id": "a"})];
        let err = run_queries(&docs, &[Query::cursor_after("zzz")]).unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn documents_get_increasing_stamps_and_events() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(Collection::Messages).await.unwrap();

        let first = backend
            .create_document(Collection::Messages, "m1", json!({"content": "a"}))
            .await
            .unwrap();
        let second = backend
            .create_document(Collection::Messages, "m2", json!({"content": "b"}))
            .await
            .unwrap();
        assert!(first["$createdAt"].as_str() < second["$createdAt"].as_str());

        let event = sub.next().await.unwrap();
        assert_eq!(event.action(), Some(ChangeAction::Create));
        assert_eq!(event.payload["$id"], "m1");

        backend
            .update_document(Collection::Messages, "m1", json!({"content": "edited"}))
            .await
            .unwrap();
        backend.delete_document(Collection::Messages, "m2").await.unwrap();

        let _ = sub.next().await.unwrap();
        let update = sub.next().await.unwrap();
        assert_eq!(update.action(), Some(ChangeAction::Update));
        assert_eq!(update.payload["content"], "edited");
        let delete = sub.next().await.unwrap();
        assert_eq!(delete.action(), Some(ChangeAction::Delete));
        assert_eq!(delete.payload["$id"], "m2");
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let backend = MemoryBackend::new();
        backend
            .create_document(Collection::Messages, "m1", json!({}))
            .await
            .unwrap();
        backend.fail_next(Call::DeleteDocument(Collection::Messages, "m1".into()));

        assert!(backend.delete_document(Collection::Messages, "m1").await.is_err());
        backend.delete_document(Collection::Messages, "m1").await.unwrap();
        assert!(backend.documents(Collection::Messages).is_empty());
    }

    #[tokio::test]
    async fn account_session_lifecycle() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.current_account().await.unwrap(), None);

        backend
            .create_account("acc1", "a@example.com", "password1", "Ada")
            .await
            .unwrap();
        assert!(backend.create_email_session("a@example.com", "wrong").await.unwrap_err().is_unauthorized());

        backend.create_email_session("a@example.com", "password1").await.unwrap();
        let account = backend.current_account().await.unwrap().unwrap();
        assert_eq!(account.id, "acc1");

        backend.delete_current_session().await.unwrap();
        assert_eq!(backend.current_account().await.unwrap(), None);
    }
}
