use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing::{debug, info, warn};

use duet_backend::{Backend, BackendConfig, MemoryBackend, MemorySnapshot, RestBackend};
use duet_session::Session;

/// Backend handle plus what has to outlive the process: the session cookie
/// for the hosted backend, or the whole store for the in-memory one.
pub struct Context {
    pub backend: Arc<dyn Backend>,
    rest: Option<Arc<RestBackend>>,
    cookie_path: Option<PathBuf>,
    memory: Option<(Arc<MemoryBackend>, PathBuf)>,
}

impl Context {
    /// `DUET_BACKEND=memory` runs against a local store kept in a file under
    /// the config directory; anything else talks to the configured endpoint.
    pub async fn from_env() -> Result<Self> {
        let kind = std::env::var("DUET_BACKEND").unwrap_or_else(|_| "rest".into());
        match kind.as_str() {
            "memory" => {
                let path = memory_path().context("no config directory for the local store")?;
                let memory = Arc::new(load_memory(&path).await?);
                info!("Local backend at {}", path.display());
                Ok(Self {
                    backend: memory.clone(),
                    rest: None,
                    cookie_path: None,
                    memory: Some((memory, path)),
                })
            }
            "rest" => {
                let config = BackendConfig::from_env()?;
                let rest = Arc::new(RestBackend::new(config)?);
                let cookie_path = cookie_path();

                if let Some(path) = &cookie_path {
                    match tokio::fs::read_to_string(path).await {
                        Ok(cookies) => {
                            rest.restore_session_cookies(cookies.trim());
                            debug!("Restored session from {}", path.display());
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!("Cannot read {}: {}", path.display(), e),
                    }
                }

                Ok(Self {
                    backend: rest.clone(),
                    rest: Some(rest),
                    cookie_path,
                    memory: None,
                })
            }
            other => bail!("DUET_BACKEND must be 'rest' or 'memory', not '{}'", other),
        }
    }

    /// Persist the current session cookie for the next run.
    pub async fn save_session(&self) -> Result<()> {
        let (Some(rest), Some(path)) = (&self.rest, &self.cookie_path) else {
            return Ok(());
        };
        let Some(cookies) = rest.session_cookies() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        tokio::fs::write(path, cookies)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub async fn clear_session(&self) -> Result<()> {
        if let Some(path) = &self.cookie_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
            }
        }
        Ok(())
    }

    /// Write the local store back; a no-op for the hosted backend.
    pub async fn persist(&self) -> Result<()> {
        match &self.memory {
            Some((memory, path)) => save_memory(memory, path).await,
            None => Ok(()),
        }
    }

    /// The signed-in session, or an error telling the user to log in.
    pub async fn session(&self) -> Result<Session> {
        match Session::restore(self.backend.clone()).await? {
            Some(session) => Ok(session),
            None => bail!("Not signed in; run `duet login` first"),
        }
    }
}

fn cookie_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("duet").join("session"))
}

fn memory_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("duet").join("local-store.json"))
}

/// Open the local store at `path`; an absent file is an empty store.
async fn load_memory(path: &Path) -> Result<MemoryBackend> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MemoryBackend::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let snapshot: MemorySnapshot =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    debug!("Loaded local store from {}", path.display());
    Ok(MemoryBackend::from_snapshot(snapshot))
}

async fn save_memory(memory: &MemoryBackend, path: &Path) -> Result<()> {
    let text = serde_json::to_string(&memory.snapshot()?)?;
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use duet_backend::Collection;
    use duet_session::Registration;
    use duet_types::Gender;

    use super::*;

    #[tokio::test]
    async fn local_store_survives_between_runs() {
        let dir = std::env::temp_dir().join(format!("duet-cli-{}", duet_backend::unique_id()));
        let path = dir.join("local-store.json");

        // First run registers
        let first = Arc::new(load_memory(&path).await.unwrap());
        let registration = Registration {
            email: "ada@example.com".into(),
            password: "correct horse".into(),
            username: "Ada".into(),
            gender: Gender::Female,
        };
        let registered = Session::register(first.clone(), &registration).await.unwrap();
        save_memory(&first, &path).await.unwrap();

        // Second run finds the session and profile
        let second = Arc::new(load_memory(&path).await.unwrap());
        let restored = Session::restore(second).await.unwrap().unwrap();
        assert_eq!(restored.user().id, registered.user().id);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_store_is_empty() {
        let path = std::env::temp_dir().join(format!("duet-cli-{}", duet_backend::unique_id())).join("none.json");
        let memory = load_memory(&path).await.unwrap();
        assert!(memory.documents(Collection::Users).is_empty());
        assert_eq!(memory.current_account().await.unwrap(), None);
    }
}
