//! Notice board CLI
//!
//! Command-line interface for managing the college notice board and its
//! cloud copy.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use noticeboard_core::{AdminSession, Config, HttpRemote, Store, SyncOrchestrator};

mod commands;
mod output;

use output::{Output, OutputFormat};

/// The orchestrator every command talks to
pub type Board = SyncOrchestrator<HttpRemote>;

#[derive(Parser)]
#[command(name = "noticeboard")]
#[command(about = "College notice board with cloud sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log sync activity to stderr (repeat for more detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Admin passphrase for commands that change the board
    #[arg(long, global = true, env = "NOTICEBOARD_ADMIN", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage notices
    Notice {
        #[command(subcommand)]
        command: NoticeCommands,
    },
    /// Manage capture forms and submit responses
    Form {
        #[command(subcommand)]
        command: FormCommands,
    },
    /// Pull the cloud document and merge it into local data
    Sync,
    /// Publish local data to the cloud
    Push,
    /// Retry queued submissions that failed to reach the cloud
    Retry {
        /// Show the log of submissions that were given up on
        #[arg(long)]
        failed: bool,
    },
    /// Show sync status and local counts
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum NoticeCommands {
    /// Post a new notice
    #[command(alias = "create")]
    Add {
        title: String,
        /// Body text
        #[arg(short, long)]
        content: Option<String>,
        /// general, academic, examination, event, placement, sports, holiday
        #[arg(long)]
        category: Option<String>,
        /// critical, high or normal
        #[arg(short, long)]
        priority: Option<String>,
        #[arg(short, long)]
        tag: Vec<String>,
        /// Pin to position 1-3
        #[arg(long)]
        pin: Option<u32>,
        /// Last day the notice applies (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Files to attach
        #[arg(short, long)]
        attach: Vec<std::path::PathBuf>,
        /// Capture form to show with this notice
        #[arg(long)]
        form: Option<String>,
    },
    /// List notices in display order
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(short, long)]
        tag: Option<String>,
    },
    /// Show notice details
    Show {
        /// Notice ID (full or prefix)
        id: String,
    },
    /// Change an existing notice
    #[command(alias = "edit")]
    Update {
        /// Notice ID (full or prefix)
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
        #[arg(long)]
        add_tag: Vec<String>,
        #[arg(long)]
        remove_tag: Vec<String>,
        /// New deadline (YYYY-MM-DD), or "none" to clear it
        #[arg(long)]
        deadline: Option<String>,
        #[arg(short, long)]
        attach: Vec<std::path::PathBuf>,
        /// Capture form to show, or "none" to detach
        #[arg(long)]
        form: Option<String>,
    },
    /// Pin a notice to a reserved position, or unpin it
    Pin {
        /// Notice ID (full or prefix)
        id: String,
        /// Position 1-3; omit to unpin
        position: Option<u32>,
    },
    /// Delete a notice
    #[command(alias = "rm")]
    Delete {
        /// Notice ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum FormCommands {
    /// List capture forms
    #[command(alias = "ls")]
    List,
    /// Show a form's questions
    Show {
        /// Form ID (full or prefix)
        id: String,
    },
    /// Build a new form
    Create {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// KIND[*]:QUESTION[:OPT1|OPT2...], `*` marks it required
        #[arg(long = "question", short = 'Q', required = true)]
        questions: Vec<String>,
    },
    /// Turn a form on or off
    Enable {
        /// Form ID (full or prefix)
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Delete a form and detach it from notices
    #[command(alias = "rm")]
    Delete {
        /// Form ID (full or prefix)
        id: String,
    },
    /// Submit a response
    Respond {
        /// Form ID (full or prefix)
        id: String,
        /// QUESTION_ID=VALUE; separate checkbox choices with commas
        #[arg(short, long = "answer")]
        answers: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (see `config show`)
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, &output),
        };
    }

    let store = Store::open()?;
    let remote = build_remote(store.config());
    let board = Board::new(store, remote)?;

    if requires_admin(&cli.command) {
        unlock_admin(&board, cli.passphrase.as_deref())?;
    }

    // Pull the latest before reading; manual sync and push do their own
    if !matches!(cli.command, Commands::Sync | Commands::Push) {
        let outcome = board.on_page_load().await?;
        debug!("Startup sync: {:?}", outcome);
        if let noticeboard_core::SyncOutcome::Failed(ref e) = outcome {
            output.warn(&format!("Auto-sync failed: {}", e.user_message()));
        }
    }

    match cli.command {
        Commands::Notice { command } => handle_notice_command(command, &board, &output).await,
        Commands::Form { command } => handle_form_command(command, &board, &output).await,
        Commands::Sync => commands::sync::sync(&board, &output).await,
        Commands::Push => commands::sync::push(&board, &output).await,
        Commands::Retry { failed } => commands::sync::retry(&board, failed, &output).await,
        Commands::Status => commands::status::show(&board, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_notice_command(command: NoticeCommands, board: &Board, output: &Output) -> Result<()> {
    use commands::notice::{self, NoticeChanges, NoticeInput};

    match command {
        NoticeCommands::Add {
            title,
            content,
            category,
            priority,
            tag,
            pin,
            deadline,
            author,
            attach,
            form,
        } => {
            let input = NoticeInput {
                title,
                content,
                category,
                priority,
                tags: tag,
                pin,
                deadline,
                author,
                attachments: attach,
                form,
            };
            notice::add(board, input, output).await
        }
        NoticeCommands::List { category, tag } => notice::list(board, category, tag, output).await,
        NoticeCommands::Show { id } => notice::show(board, id, output).await,
        NoticeCommands::Update {
            id,
            title,
            content,
            category,
            priority,
            add_tag,
            remove_tag,
            deadline,
            attach,
            form,
        } => {
            let changes = NoticeChanges {
                title,
                content,
                category,
                priority,
                add_tags: add_tag,
                remove_tags: remove_tag,
                deadline,
                attachments: attach,
                form,
            };
            notice::update(board, id, changes, output).await
        }
        NoticeCommands::Pin { id, position } => notice::pin(board, id, position, output).await,
        NoticeCommands::Delete { id } => notice::delete(board, id, output).await,
    }
}

async fn handle_form_command(command: FormCommands, board: &Board, output: &Output) -> Result<()> {
    use commands::form;

    match command {
        FormCommands::List => form::list(board, output).await,
        FormCommands::Show { id } => form::show(board, id, output).await,
        FormCommands::Create {
            title,
            description,
            questions,
        } => form::create(board, title, description, questions, output).await,
        FormCommands::Enable { id, off } => form::set_enabled(board, id, !off, output).await,
        FormCommands::Delete { id } => form::delete(board, id, output).await,
        FormCommands::Respond { id, answers } => form::respond(board, id, answers, output).await,
    }
}

/// Commands that change notices or forms
fn requires_admin(command: &Commands) -> bool {
    match command {
        Commands::Notice { command } => !matches!(
            command,
            NoticeCommands::List { .. } | NoticeCommands::Show { .. }
        ),
        Commands::Form { command } => matches!(
            command,
            FormCommands::Create { .. } | FormCommands::Enable { .. } | FormCommands::Delete { .. }
        ),
        Commands::Push => true,
        _ => false,
    }
}

fn unlock_admin(board: &Board, passphrase: Option<&str>) -> Result<()> {
    let mut session = AdminSession::new();
    let configured = board.config().admin_passphrase.as_deref();
    if !session.unlock(passphrase.unwrap_or_default(), configured) {
        if passphrase.is_none() {
            bail!("This command needs the admin passphrase (--passphrase or NOTICEBOARD_ADMIN)");
        }
        bail!("Incorrect admin passphrase");
    }
    Ok(())
}

/// Remote client for the configured document, if there is one
fn build_remote(config: &Config) -> Option<HttpRemote> {
    if !config.remote_configured() {
        return None;
    }
    match HttpRemote::from_config(config) {
        Ok(remote) => Some(remote),
        Err(e) => {
            tracing::warn!("Cloud sync unavailable: {}", e);
            None
        }
    }
}

/// Log to stderr; NOTICEBOARD_LOG wins over `-v`
fn init_logging(verbose: u8) {
    let env_filter = match std::env::var("NOTICEBOARD_LOG") {
        Ok(filter) if !filter.is_empty() => EnvFilter::new(filter),
        _ => {
            let log_level = match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!(
                "noticeboard_core={},noticeboard_cli={}",
                log_level, log_level
            ))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_read_commands_need_no_admin() {
        let cli = Cli::parse_from(["noticeboard", "notice", "list"]);
        assert!(!requires_admin(&cli.command));

        let cli = Cli::parse_from(["noticeboard", "form", "respond", "abc", "-a", "1=Yes"]);
        assert!(!requires_admin(&cli.command));
    }

    #[test]
    fn test_mutations_need_admin() {
        let cli = Cli::parse_from(["noticeboard", "notice", "pin", "abc", "1"]);
        assert!(requires_admin(&cli.command));

        let cli = Cli::parse_from(["noticeboard", "form", "delete", "abc"]);
        assert!(requires_admin(&cli.command));
    }
}
