use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "sharme",
    about = "sharme — sovereign portable memory, synced to a permanent archive",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Recovery phrase (overrides SHARME_PHRASE; prompted when absent)
    #[arg(long, global = true)]
    phrase: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a vault: generate a new phrase, or recover with --existing
    Init {
        /// Recover an existing wallet from its recovery phrase
        #[arg(long)]
        existing: bool,
    },

    /// Store or update a fact
    Set {
        /// Fact key, conventionally <scope>:<dotted.path>
        key: String,

        /// The fact value
        value: String,

        /// Scope (global or project:<name>)
        #[arg(long, short, default_value = "global")]
        scope: String,

        /// Tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Confidence (0.0 - 1.0)
        #[arg(long, default_value = "1.0")]
        confidence: f64,

        /// Session the fact came from
        #[arg(long)]
        session: Option<String>,
    },

    /// Look up one fact by key
    Get {
        key: String,
    },

    /// List facts, optionally filtered by scope
    List {
        /// Scope filter (global or project:<name>)
        #[arg(long, short)]
        scope: Option<String>,
    },

    /// Recall the facts visible in a scope (counts as access)
    Recall {
        /// Scope (global or project:<name>)
        scope: String,
    },

    /// Delete a fact (tombstoned until the next push)
    Delete {
        key: String,
    },

    /// Push dirty facts to the archive now
    Push,

    /// Pull and replay the remote log
    Pull,

    /// Push one normalized conversation JSON file
    SyncConversation {
        /// Path to the conversation file
        file: String,
    },

    /// Pull and print remote conversations
    Conversations,

    /// Issue a share link for a conversation JSON file
    Share {
        /// Path to the conversation file
        file: String,
    },

    /// Redeem a sharme://share/... URL or bare token
    Redeem {
        url: String,
    },

    /// List redeemed shares
    Imports,

    /// Show wallet and sync status
    Status,

    /// Run the background sync service
    Serve {
        /// Directory of normalized conversation JSON files to watch
        #[arg(long)]
        watch: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = sm_engine::EngineConfig::from_env();

    match cli.command {
        Commands::Init { existing } => commands::init(&config, cli.phrase, existing).await,
        Commands::Set {
            key,
            value,
            scope,
            tags,
            confidence,
            session,
        } => commands::set(&config, cli.phrase, key, value, scope, tags, confidence, session),
        Commands::Get { key } => commands::get(&config, cli.phrase, key),
        Commands::List { scope } => commands::list(&config, cli.phrase, scope),
        Commands::Recall { scope } => commands::recall(&config, cli.phrase, scope),
        Commands::Delete { key } => commands::delete(&config, cli.phrase, key),
        Commands::Push => commands::push(&config, cli.phrase).await,
        Commands::Pull => commands::pull(&config, cli.phrase).await,
        Commands::SyncConversation { file } => {
            commands::sync_conversation(&config, cli.phrase, file).await
        }
        Commands::Conversations => commands::conversations(&config, cli.phrase).await,
        Commands::Share { file } => commands::share(&config, cli.phrase, file).await,
        Commands::Redeem { url } => commands::redeem(&config, cli.phrase, url).await,
        Commands::Imports => commands::imports(&config, cli.phrase),
        Commands::Status => commands::status(&config, cli.phrase),
        Commands::Serve { watch } => commands::serve(&config, cli.phrase, watch).await,
    }
}
