pub mod api;
pub mod config;
pub mod generator;
pub mod models;
pub mod parser;
pub mod sandbox;
pub mod service;
pub mod state;
pub mod storage;

use crate::api::OpenAICompatibleProvider;
use crate::config::AppConfig;
use crate::models::{ChatSession, FileMap};
use crate::sandbox::SandboxClient;
use crate::service::{ChatService, GenerationService};
use crate::state::AppState;
use crate::storage::{FileBackend, NullBackend, SessionStore, StorageBackend};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "appdraft", about = "Describe a mobile app, get a running preview", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an app from a description and publish it to a sandbox
    Generate {
        /// Natural-language description of the app
        prompt: String,
        /// Project directory; existing files are sent as edit context and
        /// generated files are written back
        #[arg(long)]
        project: Option<PathBuf>,
        /// Update an existing sandbox instead of creating a new one
        #[arg(long)]
        sandbox: Option<String>,
    },
    /// Start an interactive chat session
    Chat {
        /// Resume a stored session by id
        #[arg(long)]
        session: Option<String>,
    },
    /// Inspect stored chat sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List stored sessions, most recent first
    List,
    /// Search session titles and message contents
    Search { query: String },
    /// Delete a session by id
    Delete { id: String },
}

pub async fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let store = SessionStore::new(default_backend());
    let state = AppState::new(
        store,
        Arc::new(OpenAICompatibleProvider::new()),
        SandboxClient::new(config.sandbox.clone()),
        config,
    );

    match cli.command {
        Command::Generate {
            prompt,
            project,
            sandbox,
        } => run_generate(state, &prompt, project.as_deref(), sandbox.as_deref()).await,
        Command::Chat { session } => run_chat(state, session.as_deref()).await,
        Command::Sessions(cmd) => run_sessions(state, cmd).await,
    }
}

// Persist sessions under the user's home directory when one exists;
// otherwise fall back to the no-op backend and run stateless.
fn default_backend() -> Box<dyn StorageBackend> {
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => Box::new(FileBackend::new(PathBuf::from(home).join(".appdraft"))),
        None => {
            log::warn!("No home directory found; chat sessions will not be persisted");
            Box::new(NullBackend)
        }
    }
}

async fn run_generate(
    state: AppState,
    prompt: &str,
    project: Option<&Path>,
    sandbox_id: Option<&str>,
) -> Result<()> {
    let existing = match project {
        Some(dir) if dir.exists() => load_project_files(dir)?,
        _ => FileMap::new(),
    };

    let service = GenerationService::new(state);
    let outcome = match service.generate_app(prompt, &existing, sandbox_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Generation failed: {e:#}");
            eprintln!("Re-run the same command to retry.");
            return Err(e);
        }
    };

    if !outcome.explanation.is_empty() {
        println!("{}\n", outcome.explanation);
    }

    // Users see the diff; the sandbox already received the full set.
    match &outcome.changed_files {
        Some(changed) => {
            println!("Changed files:");
            for path in changed.keys() {
                println!("  {path}");
            }
        }
        None => {
            println!("Generated files:");
            for path in outcome.files.keys() {
                println!("  {path}");
            }
        }
    }

    if let Some(dir) = project {
        write_project_files(dir, &outcome.files)?;
        println!("\nProject written to {}", dir.display());
    }

    println!("\nSandbox:  {}", outcome.sandbox.sandbox_id);
    println!("Preview:  {}", outcome.sandbox.preview_url);
    println!("QR code:  {}", outcome.sandbox.qr_code_url);
    Ok(())
}

async fn run_chat(state: AppState, session_id: Option<&str>) -> Result<()> {
    let mut session = match session_id {
        Some(id) => {
            let store = state.storage.lock().await;
            store
                .list()
                .into_iter()
                .find(|s| s.id == id)
                .with_context(|| format!("No stored session with id {id}"))?
        }
        None => ChatSession::new(),
    };

    println!("{} ({})", storage::display_title(&session), session.id);
    for message in &session.messages {
        println!("[{:?}] {}", message.role, message.content);
    }
    println!("Type a message, or /retry, /regen, /quit.");

    let chat = ChatService::new(state);
    let stdin = io::stdin();
    let mut last_input: Option<String> = None;

    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim().to_string();

        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/regen" => {
                if let Err(e) = chat.regenerate(&mut session, print_delta).await {
                    eprintln!("{e:#}");
                }
                println!();
            }
            "/retry" => {
                let Some(input) = last_input.clone() else {
                    eprintln!("Nothing to retry yet.");
                    continue;
                };
                if let Err(e) = chat.send_message(&mut session, input, print_delta).await {
                    eprintln!("{e:#}");
                }
                println!();
            }
            _ => {
                last_input = Some(line.clone());
                if let Err(e) = chat.send_message(&mut session, line, print_delta).await {
                    eprintln!("{e:#}");
                }
                println!();
            }
        }
    }

    Ok(())
}

fn print_delta(delta: &str) {
    print!("{delta}");
    io::stdout().flush().ok();
}

async fn run_sessions(state: AppState, cmd: SessionsCommand) -> Result<()> {
    let store = state.storage.lock().await;
    match cmd {
        SessionsCommand::List => {
            for session in store.list() {
                println!(
                    "{}  {}  ({} messages, updated {})",
                    session.id,
                    storage::display_title(&session),
                    session.messages.len(),
                    session.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        SessionsCommand::Search { query } => {
            for session in store.search(&query) {
                println!("{}  {}", session.id, storage::display_title(&session));
            }
        }
        SessionsCommand::Delete { id } => {
            store.delete(&id);
            println!("Deleted session {id} (if it existed).");
        }
    }
    Ok(())
}

// Reads every UTF-8 file under the project directory into a path -> content
// map with forward-slash relative paths.
fn load_project_files(dir: &Path) -> Result<FileMap> {
    let mut files = FileMap::new();
    collect_files(dir, dir, &mut files)?;
    log::info!("Loaded {} files from {}", files.len(), dir.display());
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, files: &mut FileMap) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') || name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let relative = path
                        .strip_prefix(root)
                        .unwrap_or(&path)
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.insert(relative, content);
                }
                Err(e) => {
                    log::warn!("Skipping non-text file {}: {e}", path.display());
                }
            }
        }
    }
    Ok(())
}

fn write_project_files(dir: &Path, files: &FileMap) -> Result<()> {
    for (path, content) in files {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(())
}
