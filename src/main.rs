//! # Recall CLI (`recall`)
//!
//! Drives the same engines the background process uses, against the same
//! SQLite session database. Useful for scripting, debugging a profile, and
//! running the background and its HTTP bridge (`recall serve`).
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall next` | Rotate to a random unvisited link |
//! | `recall visit <id>` | Record a link the user reached directly |
//! | `recall status` | Show the active link and rotation counters |
//! | `recall like <id>` | Toggle the like on a link |
//! | `recall bookmark <id>` | Toggle the bookmark on a link |
//! | `recall comment <id> <text>` | Post a comment, optionally with `--file` |
//! | `recall comments <id>` | List a link's comments |
//! | `recall login <token>` | Store the backend auth token |
//! | `recall reset` | Forget visited links, the pool and the active link |
//! | `recall serve` | Run the background process and HTTP bridge |
//! | `recall completions <shell>` | Print shell completions |

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use recall::background::{Background, LoggingShell};
use recall::config::{self, Config};
use recall::http_backend::HttpBackend;
use recall::sqlite_store::SqliteSessionStore;
use recall::{migrate, server};
use recall_core::models::{Attachment, Comment, ToggleKind};
use recall_core::rotation::RotationOutcome;
use recall_core::store::{keys, SessionStoreExt};

/// Recall CLI: content discovery with cross-context sync.
///
/// All commands except `completions` read a TOML configuration file.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Recall: content discovery with cross-context state sync",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; safe to run repeatedly.
    Init,

    /// Select the next unvisited link, fetching more pages as needed.
    Next,

    /// Mark a link as visited without rotating to it.
    Visit {
        /// Link id.
        id: String,
    },

    /// Show the active link and rotation counters.
    Status,

    /// Toggle the like on a link.
    Like {
        /// Link id.
        id: String,
    },

    /// Toggle the bookmark on a link.
    Bookmark {
        /// Link id.
        id: String,
    },

    /// Post a comment on a link.
    Comment {
        /// Link id.
        id: String,
        /// Comment text.
        text: String,
        /// Attach a file (image, video or any binary).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List the comments on a link.
    Comments {
        /// Link id.
        id: String,
    },

    /// Store the backend auth token (and optionally the user id).
    Login {
        token: String,
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Forget visited links, the cached pool and the active link.
    Reset,

    /// Run the background process and its HTTP bridge.
    ///
    /// Binds to `[server].bind` and runs until Ctrl-C.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_background(cfg: &Config) -> anyhow::Result<(Arc<SqliteSessionStore>, Background)> {
    let store = Arc::new(SqliteSessionStore::open(cfg).await?);
    let backend = Arc::new(HttpBackend::new(&cfg.backend, store.clone())?);
    let background = Background::new(cfg, store.clone(), backend, Arc::new(LoggingShell));
    Ok((store, background))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();
    Ok(Attachment {
        file_name,
        mime_type: guess_mime(path).to_string(),
        bytes,
    })
}

fn print_comments(comments: &[Comment]) {
    if comments.is_empty() {
        println!("No comments.");
        return;
    }
    for comment in comments {
        println!(
            "[{}] {} ({}): {}",
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.id,
            comment.user_id,
            comment.content
        );
        for media in comment.media.iter().flatten() {
            println!("    {} {}", media.kind, media.url);
        }
        for reply in comment.replies.iter().flatten() {
            println!("    ↳ {} ({}): {}", reply.id, reply.user_id, reply.content);
        }
    }
}

async fn toggle(bg: &Background, kind: ToggleKind, id: &str) -> anyhow::Result<()> {
    let status = bg.interactions().toggle(kind, id).await?;
    let verb = if status.engaged { "on" } else { "off" };
    match status.count {
        Some(count) => println!("{} {}: {} ({} total)", kind, id, verb, count),
        None => println!("{} {}: {}", kind, id, verb),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "recall", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Next => {
            let (store, bg) = open_background(&cfg).await?;
            match bg.rotation().rotate().await? {
                RotationOutcome::Selected(item) => {
                    println!("{}", item.title);
                    println!("  {}", item.url);
                    println!("  id: {}  domain: {}", item.id, item.domain);
                }
                RotationOutcome::Exhausted => println!("No unvisited links left."),
            }
            bg.rotation().flush_reports().await;
            store.close().await;
        }
        Commands::Visit { id } => {
            let (store, bg) = open_background(&cfg).await?;
            if bg.rotation().mark_visited(&id).await? {
                println!("Marked {} as visited.", id);
            } else {
                println!("{} was already visited.", id);
            }
            bg.rotation().flush_reports().await;
            store.close().await;
        }
        Commands::Status => {
            let (store, bg) = open_background(&cfg).await?;
            let rotation = bg.rotation();
            match rotation.active().await? {
                Some(item) => println!("Active:   {} ({})", item.title, item.url),
                None => println!("Active:   none"),
            }
            let pool = rotation.pool().await?;
            println!("Visited:  {}", rotation.visited().await?.len());
            println!("Total:    {}", rotation.total_visits().await?);
            println!("Pool:     {} links (page {})", pool.items.len(), pool.page);
            let token: Option<String> = store.get_json(keys::AUTH_TOKEN).await?;
            println!("Signed in: {}", if token.is_some() { "yes" } else { "no" });
            store.close().await;
        }
        Commands::Like { id } => {
            let (store, bg) = open_background(&cfg).await?;
            toggle(&bg, ToggleKind::Like, &id).await?;
            store.close().await;
        }
        Commands::Bookmark { id } => {
            let (store, bg) = open_background(&cfg).await?;
            toggle(&bg, ToggleKind::Bookmark, &id).await?;
            store.close().await;
        }
        Commands::Comment { id, text, file } => {
            let attachment = file.as_deref().map(read_attachment).transpose()?;
            let (store, bg) = open_background(&cfg).await?;
            let comments = bg.interactions().create_comment(&id, &text, attachment).await?;
            print_comments(&comments);
            store.close().await;
        }
        Commands::Comments { id } => {
            let (store, bg) = open_background(&cfg).await?;
            print_comments(&bg.interactions().comments(&id).await?);
            store.close().await;
        }
        Commands::Login { token, user_id } => {
            let store = SqliteSessionStore::open(&cfg).await?;
            store.set_json(keys::AUTH_TOKEN, &token).await?;
            if let Some(user_id) = user_id {
                store.set_json(keys::USER_ID, &user_id).await?;
            }
            println!("Token stored.");
            store.close().await;
        }
        Commands::Reset => {
            let (store, bg) = open_background(&cfg).await?;
            bg.rotation().reset().await?;
            println!("Rotation state cleared.");
            store.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
