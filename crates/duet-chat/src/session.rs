use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duet_backend::{Backend, BackendExt, Collection, Subscription, unique_id};
use duet_types::api::{MessageEdit, NewMessage, format_datetime};
use duet_types::{ContentType, Message};

use crate::actions::{ActionId, ActionKind, ActionTracker};
use crate::attachments::{self, MediaAsset};
use crate::cache::{ChatEvent, MessageCache};
use crate::error::{ChatError, Result};
use crate::pagination::{Debouncer, PageRequest, PaginationController};
use crate::retention::{self, SweepReport};

/// Who is chatting, and in which relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub user_id: String,
    pub relationship_id: String,
}

/// One open chat. Owns the message cache, the change-feed subscription and
/// the retention sweep started when it was mounted.
pub struct ChatSession {
    backend: Arc<dyn Backend>,
    identity: ChatIdentity,
    cache: MessageCache,
    pager: PaginationController,
    debouncer: Debouncer,
    actions: ActionTracker,
    subscription: Option<Subscription>,
    sweep: Option<JoinHandle<Result<SweepReport>>>,
    reply_to: Option<String>,
}

impl ChatSession {
    /// Open the chat: start the retention sweep in the background and
    /// subscribe to message changes. History is loaded separately.
    pub async fn mount(backend: Arc<dyn Backend>, identity: ChatIdentity) -> Result<Self> {
        Self::mount_with(backend, identity, PaginationController::default()).await
    }

    pub async fn mount_with(
        backend: Arc<dyn Backend>,
        identity: ChatIdentity,
        pager: PaginationController,
    ) -> Result<Self> {
        let sweep = {
            let backend = backend.clone();
            let relationship_id = identity.relationship_id.clone();
            tokio::spawn(async move { retention::sweep(backend.as_ref(), &relationship_id, Utc::now()).await })
        };

        let subscription = backend.subscribe(Collection::Messages).await?;
        info!("Chat opened for relationship {}", identity.relationship_id);

        Ok(Self {
            backend,
            identity,
            cache: MessageCache::new(),
            pager,
            debouncer: Debouncer::default(),
            actions: ActionTracker::new(),
            subscription: Some(subscription),
            sweep: Some(sweep),
            reply_to: None,
        })
    }

    pub fn identity(&self) -> &ChatIdentity {
        &self.identity
    }

    pub fn messages(&self) -> &[Message] {
        self.cache.messages()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.cache.get(id)
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.pager.in_flight()
    }

    pub fn actions(&self) -> &ActionTracker {
        &self.actions
    }

    /// Shared trailing debounce for initial-load triggers. Await
    /// `wait()` on a clone and call [`load_initial`](Self::load_initial)
    /// only when it returns `true`.
    pub fn debouncer(&self) -> Debouncer {
        self.debouncer.clone()
    }

    /// Wait out the debounce window, then load the newest page unless a
    /// later trigger superseded this one.
    pub async fn load_initial_debounced(&mut self) -> Result<usize> {
        if !self.debouncer.wait().await {
            return Ok(0);
        }
        self.load_initial().await
    }

    /// Load the newest page. Returns how many new messages were merged.
    pub async fn load_initial(&mut self) -> Result<usize> {
        match self.pager.begin_initial() {
            Some(request) => self.fetch(request).await,
            None => Ok(0),
        }
    }

    /// Load the next older page; a no-op once history is exhausted or
    /// while another page is loading.
    ///
    /// The cursor message can vanish under us (the retention sweep runs
    /// alongside the first page load). The stale entry is then dropped and
    /// paging continues once from the oldest message still held.
    pub async fn load_more(&mut self) -> Result<usize> {
        let Some(request) = self.pager.begin_next() else {
            return Ok(0);
        };
        let stale = request.cursor.clone();
        match self.fetch(request).await {
            Err(ChatError::Backend(e)) if e.is_unknown_cursor() => {
                if let Some(stale) = stale {
                    self.cache.apply(ChatEvent::Deleted(stale));
                }
                self.pager.rewind(self.cache.oldest_id());
                debug!("Paging cursor was gone; continuing after {:?}", self.pager.cursor());
                match self.pager.begin_next() {
                    Some(request) => self.fetch(request).await,
                    None => self.load_initial().await,
                }
            }
            other => other,
        }
    }

    async fn fetch(&mut self, request: PageRequest) -> Result<usize> {
        let queries = request.queries(&self.identity.relationship_id);
        match self.backend.list_as::<Message>(Collection::Messages, &queries).await {
            Ok(page) => {
                let last = page.last().map(|m| m.id.clone());
                self.pager.complete(page.len(), last.as_deref());
                let added = self.cache.merge_page(page);
                debug!("Merged {} messages (has_more = {})", added, self.pager.has_more());
                Ok(added)
            }
            Err(e) => {
                self.pager.fail();
                warn!("Failed to load messages: {}", e);
                Err(e.into())
            }
        }
    }

    // -- Live changes --

    pub fn apply_event(&mut self, event: ChatEvent) -> bool {
        self.cache.apply(event)
    }

    /// Wait for the next change that concerns this chat and apply it.
    /// `None` once the feed has closed.
    pub async fn next_change(&mut self) -> Option<ChatEvent> {
        loop {
            let event = self.subscription.as_mut()?.next().await?;
            if let Some(change) = ChatEvent::from_realtime(&event, &self.identity.relationship_id) {
                self.cache.apply(change.clone());
                return Some(change);
            }
        }
    }

    /// Apply every change already delivered, without waiting. Returns how
    /// many were applied.
    pub fn drain_changes(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        let mut applied = 0;
        while let Some(event) = subscription.try_next() {
            if let Some(change) = ChatEvent::from_realtime(&event, &self.identity.relationship_id) {
                self.cache.apply(change);
                applied += 1;
            }
        }
        applied
    }

    // -- Replies --

    pub fn set_reply_target(&mut self, message_id: Option<&str>) -> Result<()> {
        if let Some(id) = message_id
            && self.cache.get(id).is_none()
        {
            return Err(ChatError::UnknownMessage(id.to_string()));
        }
        self.reply_to = message_id.map(str::to_owned);
        Ok(())
    }

    pub fn reply_target(&self) -> Option<&Message> {
        self.reply_to.as_deref().and_then(|id| self.cache.get(id))
    }

    // -- Actions --

    pub async fn send_text(&mut self, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.send(text.to_string(), ContentType::text(), None).await
    }

    /// Send an external GIF by URL.
    pub async fn send_gif(&mut self, url: &str) -> Result<Message> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.send(url.to_string(), ContentType::gif(), None).await
    }

    /// Upload the asset to the media bucket and send its view URL.
    pub async fn send_attachment(&mut self, asset: &MediaAsset) -> Result<Message> {
        let action = self.actions.start(ActionKind::Upload, None);
        let result = attachments::upload(self.backend.as_ref(), asset).await;
        let media = self.settle(action, result)?;

        let sent = self
            .send(media.url, ContentType::new(media.mime_type), Some(media.file_id.clone()))
            .await;
        if sent.is_err()
            && let Err(e) = self.backend.delete_file(&media.file_id).await
        {
            warn!("Could not remove orphaned upload {}: {}", media.file_id, e);
        }
        sent
    }

    async fn send(&mut self, content: String, content_type: ContentType, file_id: Option<String>) -> Result<Message> {
        let action = self.actions.start(ActionKind::Send, None);
        let draft = NewMessage {
            content,
            sender_id: self.identity.user_id.clone(),
            timestamp: format_datetime(Utc::now()),
            relationship_id: self.identity.relationship_id.clone(),
            reply_to: self.reply_to.clone(),
            content_type: content_type.as_str().to_string(),
            file_id,
        };

        let result = self
            .backend
            .create_as::<Message, _>(Collection::Messages, &unique_id(), &draft)
            .await;
        let message = self.settle(action, result)?;

        self.reply_to = None;
        self.cache.apply(ChatEvent::Created(message.clone()));
        Ok(message)
    }

    pub async fn edit(&mut self, message_id: &str, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let action = self.actions.start(ActionKind::Edit, Some(message_id));
        let edit = MessageEdit { content: text.to_string() };
        let result = self
            .backend
            .update_as::<Message, _>(Collection::Messages, message_id, &edit)
            .await;
        let message = self.settle(action, result)?;

        self.cache.apply(ChatEvent::Updated(message.clone()));
        Ok(message)
    }

    /// Delete a loaded message, together with its stored attachment.
    pub async fn delete(&mut self, message_id: &str) -> Result<()> {
        let message = self
            .cache
            .get(message_id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))?;

        let action = self.actions.start(ActionKind::Delete, Some(message_id));
        let result = attachments::delete_message(self.backend.as_ref(), &message).await;
        self.settle(action, result)?;

        if self.reply_to.as_deref() == Some(message_id) {
            self.reply_to = None;
        }
        self.cache.apply(ChatEvent::Deleted(message.id));
        Ok(())
    }

    fn settle<T, E>(&mut self, action: ActionId, result: std::result::Result<T, E>) -> Result<T>
    where
        E: Into<ChatError>,
    {
        match result {
            Ok(value) => {
                self.actions.succeed(action);
                Ok(value)
            }
            Err(e) => {
                let e = e.into();
                warn!("Chat action failed: {}", e);
                self.actions.fail(action, e.to_string());
                Err(e)
            }
        }
    }

    // -- Lifecycle --

    /// Wait for the mount-time retention sweep. `None` when it already
    /// reported or failed; failures are logged only.
    pub async fn sweep_finished(&mut self) -> Option<SweepReport> {
        match self.sweep.take()?.await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!("Retention sweep failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Retention sweep task ended abnormally: {}", e);
                None
            }
        }
    }

    /// Stop listening for changes. The retention sweep, if still running,
    /// is left to finish.
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        info!("Chat closed for relationship {}", self.identity.relationship_id);
    }
}
