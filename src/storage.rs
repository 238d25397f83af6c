//! Client-side session state behind an explicit store interface.
//!
//! Four fixed keys are persisted: `token`, `user`, `sidebarState` and
//! `notificationSettings`. The store is injected into the Gateway client and
//! the role console, so tests swap in [`MemoryStore`] and desktop builds use
//! the OS keyring ([`KeyringStore`]) or the SQLite settings table
//! ([`crate::db::LocalSettings`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keyring::Entry;
use tokio::sync::watch;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{DineError, DineResult};
use crate::models::UserProfile;
use crate::notifications::NotificationSettings;

const SERVICE_NAME: &str = "dinetrack";

pub const KEY_TOKEN: &str = "token";
pub const KEY_USER: &str = "user";
pub const KEY_SIDEBAR_STATE: &str = "sidebarState";
pub const KEY_NOTIFICATION_SETTINGS: &str = "notificationSettings";

/// All keys managed by [`Session`].
pub const ALL_KEYS: &[&str] = &[
    KEY_TOKEN,
    KEY_USER,
    KEY_SIDEBAR_STATE,
    KEY_NOTIFICATION_SETTINGS,
];

/// Get/set/clear over string values.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> DineResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> DineResult<()>;
    /// Remove a key. Succeeds when the key does not exist.
    fn clear(&self, key: &str) -> DineResult<()>;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// OS credential store: DPAPI on Windows, Keychain on macOS, Secret Service
/// on Linux.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> DineResult<Entry> {
        Entry::new(&self.service, key).map_err(DineError::from)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringStore {
    fn get(&self, key: &str) -> DineResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                Err(e.into())
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> DineResult<()> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn clear(&self, key: &str) -> DineResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for tests and ephemeral consoles.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DineResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|e| DineError::Storage(e.to_string()))
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> DineResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> DineResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> DineResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Login-scoped state. The token is cached in memory (zeroized on teardown)
/// so the Gateway client does not hit the backing store on every request.
pub struct Session {
    store: Arc<dyn SessionStore>,
    token: Mutex<Option<Zeroizing<String>>>,
    signed_in: watch::Sender<bool>,
}

impl Session {
    /// Restore a session from the store.
    pub fn load(store: Arc<dyn SessionStore>) -> Self {
        let token = match store.get(KEY_TOKEN) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "session: failed to read stored token");
                None
            }
        };
        let (signed_in, _) = watch::channel(token.is_some());
        Self {
            store,
            token: Mutex::new(token.map(Zeroizing::new)),
            signed_in,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|t| t.to_string()))
    }

    pub fn is_signed_in(&self) -> bool {
        *self.signed_in.borrow()
    }

    /// Watch that flips to `false` on teardown; consumers route to login.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signed_in.subscribe()
    }

    pub fn sign_in(&self, token: &str, user: &UserProfile) -> DineResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(crate::error::ValidationError::EmptyField("token").into());
        }
        self.store.set(KEY_TOKEN, token)?;
        self.store.set(KEY_USER, &serde_json::to_string(user)?)?;
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(Zeroizing::new(token.to_string()));
        }
        self.signed_in.send_replace(true);
        info!(user_id = %user.id, role = %user.role, "session started");
        Ok(())
    }

    /// Cached profile, if one is stored and still decodes.
    pub fn user(&self) -> Option<UserProfile> {
        let raw = self.store.get(KEY_USER).ok().flatten()?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "session: stored user profile is unreadable");
                None
            }
        }
    }

    /// Clear the token and cached profile. Preferences survive.
    pub fn teardown(&self) {
        if let Ok(mut guard) = self.token.lock() {
            guard.take();
        }
        for key in [KEY_TOKEN, KEY_USER] {
            if let Err(e) = self.store.clear(key) {
                warn!(key, error = %e, "session: failed to clear key");
            }
        }
        if self.signed_in.send_replace(false) {
            info!("session torn down; sign-in required");
        }
    }

    pub fn sidebar_open(&self) -> bool {
        self.store
            .get(KEY_SIDEBAR_STATE)
            .ok()
            .flatten()
            .map(|v| v.trim() == "true")
            .unwrap_or(true)
    }

    pub fn set_sidebar_open(&self, open: bool) -> DineResult<()> {
        self.store
            .set(KEY_SIDEBAR_STATE, if open { "true" } else { "false" })
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        self.store
            .get(KEY_NOTIFICATION_SETTINGS)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_notification_settings(&self, settings: &NotificationSettings) -> DineResult<()> {
        self.store
            .set(KEY_NOTIFICATION_SETTINGS, &serde_json::to_string(settings)?)
    }
}

/// Client-side check for a password change form before anything is sent.
pub fn confirm_password(password: &str, confirmation: &str) -> DineResult<()> {
    if password.is_empty() {
        return Err(crate::error::ValidationError::EmptyField("password").into());
    }
    if password != confirmation {
        return Err(crate::error::ValidationError::PasswordMismatch.into());
    }
    Ok(())
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("signed_in", &self.is_signed_in())
            .finish_non_exhaustive()
    }
}
