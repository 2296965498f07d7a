use std::io::{self, Write};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use kguide_core::{
    ChatSessionController, Config, CredentialStore, FileCredentialStore, Rejection, TurnOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod app;
mod render;

use app::Session;
use render::Renderer;

#[derive(Parser)]
#[command(name = "kguide")]
#[command(about = "Chat with the k-guidance Korea travel assistant")]
struct Cli {
    /// Backend base URL (overrides the config file and KGUIDE_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// Ask a single question and print the answer
    Ask {
        /// Your question
        question: String,
    },
    /// Store a session token for later requests
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored session token
    Logout,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kguide_core=warn,kguide_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command {
        Commands::Chat => chat(&config).await?,
        Commands::Ask { question } => ask(&config, &question).await?,
        Commands::Login { token } => login(&session_store()?, &token)?,
        Commands::Logout => logout(&session_store()?)?,
    }

    Ok(())
}

async fn chat(config: &Config) -> Result<()> {
    let Session {
        mut controller,
        mut signed_out,
    } = app::connect(config)?;
    let mut renderer = Renderer::new();

    if let Some(welcome) = controller.transcript().last() {
        println!("{}", welcome.text.bold().blue());
    }
    println!("{}", "Type /quit to leave.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signed_out.wait_for(|done| *done) => break,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        let outcome = run_turn(&mut controller, &mut renderer, text).await?;
        if matches!(outcome, Some(TurnOutcome::Failed { ref error, .. }) if error.requires_login()) {
            let _ = signed_out.wait_for(|done| *done).await;
            break;
        }
    }

    Ok(())
}

async fn ask(config: &Config, question: &str) -> Result<()> {
    let Session {
        mut controller,
        mut signed_out,
    } = app::connect(config)?;
    let mut renderer = Renderer::new();

    match run_turn(&mut controller, &mut renderer, question).await? {
        Some(TurnOutcome::Failed { error, .. }) => {
            if error.requires_login() {
                let _ = signed_out.wait_for(|done| *done).await;
            }
            bail!(error);
        }
        Some(TurnOutcome::Completed(_)) => {}
        None => eprintln!("{}", "Nothing to ask.".yellow()),
    }

    Ok(())
}

/// Sends one message, rendering every snapshot the controller publishes
/// until the turn ends.
async fn run_turn(
    controller: &mut ChatSessionController,
    renderer: &mut Renderer,
    text: &str,
) -> Result<Option<TurnOutcome>> {
    let mut updates = controller.subscribe();
    updates.borrow_and_update();
    let mut stdout = io::stdout();

    let result = {
        let send = controller.send(text);
        tokio::pin!(send);
        loop {
            tokio::select! {
                result = &mut send => break result,
                Ok(()) = updates.changed() => {
                    let snapshot = updates.borrow_and_update().clone();
                    renderer.render(&snapshot, &mut stdout)?;
                }
            }
        }
    };
    renderer.render(controller.transcript(), &mut stdout)?;

    match result {
        Ok(outcome) => {
            if let TurnOutcome::Failed { error, .. } = &outcome {
                tracing::debug!("turn failed: {error}");
            }
            Ok(Some(outcome))
        }
        Err(Rejection::EmptyMessage) => Ok(None),
        Err(Rejection::Busy) => {
            eprintln!("{}", "Still answering the previous message.".yellow());
            Ok(None)
        }
    }
}

fn session_store() -> Result<FileCredentialStore> {
    Ok(FileCredentialStore::new(Config::session_path()?))
}

fn login(store: &FileCredentialStore, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("session token must not be empty");
    }
    store.set(token)?;
    println!("{} {}", "Session saved to".green(), store.path().display());
    Ok(())
}

fn logout(store: &FileCredentialStore) -> Result<()> {
    store.clear()?;
    println!("{}", "Signed out.".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_login_then_logout() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("kguide").join("session.json"));

        login(&store, "  abc123\n").unwrap();
        assert_eq!(store.get().as_deref(), Some("abc123"));

        logout(&store).unwrap();
        assert!(store.get().is_none());
        assert!(!store.path().exists());

        // Signing out twice is harmless.
        logout(&store).unwrap();
    }

    #[test]
    fn test_blank_token_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("session.json"));

        assert!(login(&store, "   ").is_err());
        assert!(store.get().is_none());
    }
}
