use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use duet_backend::{Backend, BackendExt, Collection, unique_id};
use duet_chat::ChatIdentity;
use duet_types::api::{Account, NewUser, Query};
use duet_types::{Gender, Relationship, User};

use crate::error::SessionError;

const MIN_PASSWORD_LEN: usize = 8;

/// Where a signed-in user belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No relationship yet: create one or join with a code.
    Onboarding,
    /// Relationship created, partner has not joined.
    WaitingForPartner,
    Home,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub username: String,
    pub gender: Gender,
}

impl Registration {
    pub fn validate(&self) -> Result<(), SessionError> {
        validate_credentials(&self.email, &self.password)?;
        if self.username.trim().is_empty() {
            return Err(SessionError::InvalidCredentials("username is empty".into()));
        }
        Ok(())
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), SessionError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(SessionError::InvalidCredentials("email address is not valid".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SessionError::InvalidCredentials(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// A signed-in user with their relationship and partner, as last loaded.
/// Created by [`register`](Self::register), [`sign_in`](Self::sign_in) or
/// [`restore`](Self::restore); ended by [`sign_out`](Self::sign_out).
pub struct Session {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) account: Account,
    pub(crate) user: User,
    pub(crate) relationship: Option<Relationship>,
    pub(crate) partner: Option<User>,
}

impl Session {
    pub async fn register(backend: Arc<dyn Backend>, registration: &Registration) -> Result<Self, SessionError> {
        registration.validate()?;
        let email = registration.email.trim();
        let username = registration.username.trim();

        let account = backend
            .create_account(&unique_id(), email, &registration.password, username)
            .await?;
        backend.create_email_session(email, &registration.password).await?;

        let profile = NewUser {
            account_id: account.id.clone(),
            email: email.to_string(),
            username: username.to_string(),
            avatar: backend.initials_avatar_url(username),
            gender: registration.gender.as_str().to_string(),
        };
        let user: User = backend.create_as(Collection::Users, &unique_id(), &profile).await?;
        info!("Registered {} as user {}", user.username, user.id);

        Ok(Self {
            backend,
            account,
            user,
            relationship: None,
            partner: None,
        })
    }

    pub async fn sign_in(backend: Arc<dyn Backend>, email: &str, password: &str) -> Result<Self, SessionError> {
        validate_credentials(email, password)?;
        backend.create_email_session(email.trim(), password).await?;
        let account = backend
            .current_account()
            .await?
            .ok_or_else(|| SessionError::InvalidCredentials("session was not established".into()))?;
        Self::load(backend, account).await
    }

    /// Resume an existing backend session. `None` when there is none.
    pub async fn restore(backend: Arc<dyn Backend>) -> Result<Option<Self>, SessionError> {
        match backend.current_account().await? {
            Some(account) => Ok(Some(Self::load(backend, account).await?)),
            None => Ok(None),
        }
    }

    async fn load(backend: Arc<dyn Backend>, account: Account) -> Result<Self, SessionError> {
        let user: User = backend
            .first_as(Collection::Users, &[Query::equal("accountId", account.id.as_str())])
            .await?
            .ok_or_else(|| SessionError::MissingProfile(account.id.clone()))?;
        debug!("Loaded profile {} for account {}", user.id, account.id);

        let mut session = Self {
            backend,
            account,
            user,
            relationship: None,
            partner: None,
        };
        session.load_relationship().await?;
        Ok(session)
    }

    /// Reload the user profile, relationship and partner.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        if let Some(user) = self
            .backend
            .first_as::<User>(Collection::Users, &[Query::equal("$id", self.user.id.as_str())])
            .await?
        {
            self.user = user;
        }
        self.load_relationship().await?;
        Ok(())
    }

    pub(crate) async fn load_relationship(&mut self) -> duet_backend::Result<()> {
        self.relationship = None;
        self.partner = None;

        let Some(relationship_id) = self.user.relationship_id.clone() else {
            return Ok(());
        };
        let relationship: Option<Relationship> = self
            .backend
            .first_as(Collection::Relationships, &[Query::equal("$id", relationship_id.as_str())])
            .await?;
        let Some(relationship) = relationship else {
            warn!("Relationship {} of user {} no longer exists", relationship_id, self.user.id);
            return Ok(());
        };

        if let Some(partner_id) = relationship.partner_of(&self.user.id) {
            self.partner = self
                .backend
                .first_as(Collection::Users, &[Query::equal("$id", partner_id)])
                .await?;
        }
        self.relationship = Some(relationship);
        Ok(())
    }

    pub(crate) async fn set_relationship_id(&mut self, relationship_id: Option<&str>) -> duet_backend::Result<()> {
        self.user = self
            .backend
            .update_as(Collection::Users, &self.user.id, &json!({ "relationshipId": relationship_id }))
            .await?;
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        self.relationship.as_ref()
    }

    pub fn partner(&self) -> Option<&User> {
        self.partner.as_ref()
    }

    pub fn route(&self) -> Route {
        match &self.relationship {
            None => Route::Onboarding,
            Some(r) if !r.is_complete() => Route::WaitingForPartner,
            Some(_) => Route::Home,
        }
    }

    /// Identity for opening the chat; `None` without a relationship.
    pub fn chat_identity(&self) -> Option<ChatIdentity> {
        self.relationship.as_ref().map(|r| ChatIdentity {
            user_id: self.user.id.clone(),
            relationship_id: r.id.clone(),
        })
    }

    pub async fn sign_out(self) -> Result<(), SessionError> {
        self.backend.delete_current_session().await?;
        info!("Signed out {}", self.user.username);
        Ok(())
    }
}
