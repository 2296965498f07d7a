//! Session token handling and recovery from authentication failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::event::{ErrorCode, ErrorPayload};

pub const LOGIN_REQUIRED_TEXT: &str = "Please log in to continue.";
pub const SESSION_EXPIRED_TEXT: &str = "Your session has expired. Please log in again.";

/// Fragments of backend error text that mean the session is gone. Only
/// consulted when the event carries no `code`.
const EXPIRY_MARKERS: [&str; 3] = ["unauthenticated", "expired", "로그인"];

/// Storage for the opaque session token.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps the token in memory only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.slot().clone()
    }

    fn set(&self, token: &str) -> Result<()> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    session_id: String,
}

/// Keeps the token in a small JSON file, usually next to the config.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<SessionFile>(&content) {
            Ok(file) => Some(file.session_id),
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring unreadable session file: {err}");
                None
            }
        }
    }

    fn set(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&SessionFile {
            session_id: token.to_string(),
        })?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Sends the user back to the application entry point (the login screen).
pub trait Navigator: Send + Sync {
    fn navigate_to_entry(&self);
}

impl<F> Navigator for F
where
    F: Fn() + Send + Sync,
{
    fn navigate_to_entry(&self) {
        self()
    }
}

/// Maps the stream-open response status to a session failure, if any.
pub fn status_error(status: StatusCode) -> Option<ChatError> {
    (status == StatusCode::UNAUTHORIZED).then_some(ChatError::SessionExpired)
}

/// Detects authentication failures and drives the logout sequence.
pub struct SessionGuard {
    credentials: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    redirect_delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SessionGuard {
    pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(2000);

    pub fn new(credentials: Arc<dyn CredentialStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            credentials,
            navigator,
            redirect_delay: Self::DEFAULT_REDIRECT_DELAY,
            pending: Mutex::new(None),
        }
    }

    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Pre-flight check. An empty token counts as absent.
    pub fn require_token(&self) -> Result<String, ChatError> {
        match self.credentials.get() {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ChatError::Unauthenticated),
        }
    }

    /// Classifies a backend `error` event. Returns `SessionExpired` when the
    /// event says the session is no longer valid.
    pub fn classify(&self, error: &ErrorPayload) -> ChatError {
        let expired = match error.code {
            Some(ErrorCode::Unauthenticated | ErrorCode::SessionExpired) => true,
            Some(ErrorCode::Other) => false,
            None => {
                let text = error.message.to_lowercase();
                EXPIRY_MARKERS.iter().any(|marker| text.contains(marker))
            }
        };

        if expired {
            ChatError::SessionExpired
        } else {
            ChatError::BackendError(error.message.clone())
        }
    }

    /// Purges the stored token and schedules the redirect to the entry point.
    ///
    /// Returns false when a redirect is already pending; the token is cleared
    /// either way.
    pub fn expire(&self) -> bool {
        if let Err(err) = self.credentials.clear() {
            error!("failed to clear session token: {err}");
        }

        let mut pending = self.pending();
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("redirect already scheduled");
            return false;
        }

        info!(delay_ms = self.redirect_delay.as_millis() as u64, "session ended, redirecting to login");
        let navigator = self.navigator.clone();
        let delay = self.redirect_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                *pending = Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    navigator.navigate_to_entry();
                }));
            }
            Err(_) => {
                warn!("no async runtime for delayed redirect, navigating now");
                navigator.navigate_to_entry();
            }
        }
        true
    }

    pub fn navigation_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard_with_counter(token: Option<&str>) -> (SessionGuard, Arc<AtomicUsize>) {
        let store = match token {
            Some(token) => MemoryCredentialStore::with_token(token),
            None => MemoryCredentialStore::new(),
        };
        let count = Arc::new(AtomicUsize::new(0));
        let nav_count = count.clone();
        let navigator = move || {
            nav_count.fetch_add(1, Ordering::SeqCst);
        };
        (SessionGuard::new(Arc::new(store), Arc::new(navigator)), count)
    }

    fn error_event(message: &str, code: Option<ErrorCode>) -> ErrorPayload {
        ErrorPayload {
            message: message.to_string(),
            code,
        }
    }

    #[test]
    fn test_require_token() {
        let (guard, _) = guard_with_counter(Some("abc"));
        assert_eq!(guard.require_token().unwrap(), "abc");

        let (guard, _) = guard_with_counter(None);
        assert!(matches!(guard.require_token(), Err(ChatError::Unauthenticated)));

        let (guard, _) = guard_with_counter(Some("  "));
        assert!(matches!(guard.require_token(), Err(ChatError::Unauthenticated)));
    }

    #[test]
    fn test_status_error() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            Some(ChatError::SessionExpired)
        ));
        assert!(status_error(StatusCode::OK).is_none());
        assert!(status_error(StatusCode::FORBIDDEN).is_none());
    }

    #[test]
    fn test_classify_prefers_code() {
        let (guard, _) = guard_with_counter(Some("abc"));
        assert!(matches!(
            guard.classify(&error_event("please sign in", Some(ErrorCode::SessionExpired))),
            ChatError::SessionExpired
        ));
        assert!(matches!(
            guard.classify(&error_event("token expired", Some(ErrorCode::Other))),
            ChatError::BackendError(_)
        ));
    }

    #[test]
    fn test_classify_falls_back_to_text() {
        let (guard, _) = guard_with_counter(Some("abc"));
        assert!(matches!(
            guard.classify(&error_event("unauthenticated", None)),
            ChatError::SessionExpired
        ));
        assert!(matches!(
            guard.classify(&error_event("Session EXPIRED", None)),
            ChatError::SessionExpired
        ));
        assert!(matches!(
            guard.classify(&error_event("로그인이 만료되었습니다.", None)),
            ChatError::SessionExpired
        ));
        match guard.classify(&error_event("search index offline", None)) {
            ChatError::BackendError(text) => assert_eq!(text, "search index offline"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_clears_and_navigates_after_delay() {
        let (guard, count) = guard_with_counter(Some("abc"));

        assert!(guard.expire());
        assert!(guard.credentials().get().is_none());
        assert!(guard.navigation_pending());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!guard.navigation_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_schedules_once() {
        let (guard, count) = guard_with_counter(Some("abc"));

        assert!(guard.expire());
        assert!(!guard.expire());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(guard.expire());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expire_without_runtime_navigates_now() {
        let (guard, count) = guard_with_counter(Some("abc"));
        assert!(guard.expire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!guard.navigation_pending());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("session.json"));

        assert!(store.get().is_none());
        store.set("token-123").unwrap();
        assert_eq!(store.get().as_deref(), Some("token-123"));
        store.clear().unwrap();
        assert!(store.get().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileCredentialStore::new(path).get().is_none());
    }
}
