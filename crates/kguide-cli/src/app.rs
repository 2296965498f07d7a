use std::sync::Arc;

use anyhow::Result;
use colored::*;
use kguide_core::config::SESSION_TOKEN_ENV;
use kguide_core::{
    ChatSessionController, Config, CredentialStore, FileCredentialStore, HttpChatBackend, Marker,
    MarkerKind, MarkerRegistry, MemoryCredentialStore, SessionGuard, Transcript,
};
use tokio::sync::watch;
use tracing::debug;

/// A wired-up controller plus the signal raised when the session is sent
/// back to login.
pub struct Session {
    pub controller: ChatSessionController,
    pub signed_out: watch::Receiver<bool>,
}

/// Token from the environment if set, otherwise the on-disk session file.
pub fn credential_store() -> Result<Arc<dyn CredentialStore>> {
    if let Ok(token) = std::env::var(SESSION_TOKEN_ENV) {
        let token = token.trim();
        if !token.is_empty() {
            debug!("using session token from {SESSION_TOKEN_ENV}");
            return Ok(Arc::new(MemoryCredentialStore::with_token(token)));
        }
    }
    Ok(Arc::new(FileCredentialStore::new(Config::session_path()?)))
}

pub fn connect(config: &Config) -> Result<Session> {
    let (signal, signed_out) = watch::channel(false);
    let navigator = move || {
        println!(
            "\n{}",
            "Signed out. Run `kguide login --token <token>` to continue.".yellow()
        );
        let _ = signal.send(true);
    };

    let guard = SessionGuard::new(credential_store()?, Arc::new(navigator))
        .with_redirect_delay(config.expiry_redirect_delay());
    let backend = HttpChatBackend::from_config(config);
    debug!(url = backend.url(), "connecting chat backend");

    let controller = ChatSessionController::new(Arc::new(backend), guard)
        .with_markers(marker_registry())
        .with_transcript(Transcript::with_welcome(config.welcome_message.clone()));

    Ok(Session {
        controller,
        signed_out,
    })
}

fn marker_registry() -> MarkerRegistry {
    MarkerRegistry::new()
        .on_kind(MarkerKind::Festival, |markers: &[Marker]| {
            print_markers("🎉", markers)
        })
        .on_kind(MarkerKind::Attraction, |markers: &[Marker]| {
            print_markers("📍", markers)
        })
}

fn print_markers(icon: &str, markers: &[Marker]) {
    for marker in markers {
        let Some((latitude, longitude)) = marker.position() else {
            continue;
        };
        println!(
            "  {} {} {}",
            icon,
            marker.title.bold(),
            format!("({latitude:.4}, {longitude:.4})").dimmed()
        );
    }
}
