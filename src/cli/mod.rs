pub mod commands;

use crate::shared::models::SenderFilter;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audio-chat")]
#[command(about = "Chat sessions, message search and audio commands")]
pub struct Cli {
    /// Increase log verbosity (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the storage directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage chat sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Append a message to a session
    Message {
        /// Message text
        text: String,
        /// Target session (defaults to the active one)
        #[arg(long)]
        session: Option<String>,
        /// Record the message as coming from the bot
        #[arg(long)]
        bot: bool,
    },
    /// Search messages across all sessions
    Search {
        /// Search query
        query: String,
        #[command(flatten)]
        filters: FilterArgs,
        /// Results limit (0 = unlimited)
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search as you type: each stdin line replaces the query
    Live {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Recent, popular and pinned sessions
    Views {
        #[arg(value_enum, default_value = "all")]
        view: ViewKind,
    },
    /// Previously executed search queries
    SearchHistory {
        /// Forget all recorded queries
        #[arg(long)]
        clear: bool,
    },
    /// Named searches
    Saved {
        #[command(subcommand)]
        action: SavedAction,
    },
    /// Upload an audio file to the processing server
    Upload {
        file: PathBuf,
        #[arg(long)]
        session: Option<String>,
        /// MIME type to send instead of the one derived from the extension
        #[arg(long)]
        mime: Option<String>,
    },
    /// Run a natural-language editing command on the uploaded file
    Command {
        text: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Show how the server would interpret a command
    Interpret {
        text: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Complete a partial command
    Suggest {
        partial: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Language model settings on the server
    Llm {
        #[command(subcommand)]
        action: LlmAction,
    },
    /// Local storage management
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a session and make it active
    New { title: String },
    /// List sessions
    List {
        /// Include archived sessions
        #[arg(long)]
        archived: bool,
    },
    /// Print a session's messages
    Show { id: String },
    /// Make a session active
    Use { id: String },
    Rename { id: String, title: String },
    Delete { id: String },
    /// Toggle the archive flag
    Archive { id: String },
    /// Toggle the pin flag
    Pin { id: String },
}

#[derive(Subcommand)]
pub enum SavedAction {
    /// Save a query under a name
    Save {
        name: String,
        query: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    List,
    /// Run a saved search by id or name
    Run { id: String },
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum LlmAction {
    /// List available models
    Models,
    /// Show the active model
    Active,
    /// Switch the active model
    SetActive { model_id: String },
    Metrics,
    Status,
    Usage,
}

#[derive(Subcommand)]
pub enum StorageAction {
    /// Show storage location and usage
    Info,
    /// Remove all sessions, search history and saved searches
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ViewKind {
    All,
    Recent,
    Popular,
    Pinned,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SenderArg {
    All,
    User,
    Bot,
}

impl From<SenderArg> for SenderFilter {
    fn from(arg: SenderArg) -> Self {
        match arg {
            SenderArg::All => SenderFilter::All,
            SenderArg::User => SenderFilter::User,
            SenderArg::Bot => SenderFilter::Bot,
        }
    }
}

#[derive(clap::Args, Clone)]
pub struct FilterArgs {
    /// Treat the query as a regular expression
    #[arg(long)]
    pub regex: bool,
    /// Only messages from this sender
    #[arg(long, value_enum, default_value = "all")]
    pub sender: SenderArg,
    /// Only messages from this session
    #[arg(long = "in-session")]
    pub session: Option<String>,
    /// Earliest day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Latest day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run(cli).await
}
