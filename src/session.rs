//! Locally persisted identity.
//!
//! The token and username are stored as JSON in the user's config directory.
//! Their presence is the only authentication check done on this side; the
//! server validates the token.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};

const APP_DIR: &str = "tutor-chat";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            name: None,
            is_admin: false,
        }
    }

    /// A session is usable only when both token and username are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty() && !self.username.trim().is_empty()
    }

    /// Build a session from `TUTOR_TOKEN` and `TUTOR_USERNAME`, if both are set.
    pub fn from_env() -> Option<Self> {
        let token = env::var("TUTOR_TOKEN").ok()?;
        let username = env::var("TUTOR_USERNAME").ok()?;
        let session = Self::new(token, username);
        session.is_complete().then_some(session)
    }

    /// Display name for prompts and greetings
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store under `<config dir>/tutor-chat/session.json`
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| ChatError::Session("could not determine config directory".into()))?;
        Ok(Self::at(dir.join(APP_DIR).join(SESSION_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment overrides win over the stored file.
    pub fn resolve(&self) -> Result<Option<Session>> {
        if let Some(session) = Session::from_env() {
            debug!("Using session from environment for {}", session.username);
            return Ok(Some(session));
        }
        self.load()
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| ChatError::Session(format!("failed to read {}: {}", self.path.display(), e)))?;
        let session: Session = serde_json::from_str(&content)?;

        Ok(session.is_complete().then_some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ChatError::Session(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, content)
            .map_err(|e| ChatError::Session(format!("failed to write {}: {}", self.path.display(), e)))?;

        debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    /// Returns whether a session file was removed.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .map_err(|e| ChatError::Session(format!("failed to remove {}: {}", self.path.display(), e)))?;
        Ok(true)
    }
}
