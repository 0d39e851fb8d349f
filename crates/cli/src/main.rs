mod category_commands;
mod channel_commands;
mod config_commands;
mod db_commands;
mod type_commands;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    chanreg_config::ChanregConfig,
    chanreg_directory::SqliteDirectory,
    chanreg_registry::{
        ReadStrategy, SqliteChannelRegistryStore, SqliteSequenceAllocator, StoreOptions,
    },
    clap::{Parser, Subcommand},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chanreg", about = "Channel definition registry administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides discovery in ./ and ~/.config/chanreg/).
    #[arg(long, global = true, env = "CHANREG_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Read, publish, and approve channel definitions.
    Channel {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Channel type catalog.
    Types {
        #[command(subcommand)]
        action: type_commands::TypeAction,
    },
    /// Channel categories.
    Category {
        #[command(subcommand)]
        action: category_commands::CategoryAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ChanregConfig> {
    match path {
        Some(path) => chanreg_config::load_config(path),
        None => Ok(chanreg_config::discover_and_load()),
    }
}

/// Open the configured database and run every crate's migrations.
pub(crate) async fn connect(config: &ChanregConfig) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    chanreg_directory::run_migrations(&pool).await?;
    chanreg_registry::run_migrations(&pool).await?;
    debug!(url = %config.database.url, "database ready");
    Ok(pool)
}

/// Store and directory wired from config.
pub(crate) struct App {
    pub directory: Arc<SqliteDirectory>,
    pub store: SqliteChannelRegistryStore,
}

impl App {
    pub(crate) async fn open(config: &ChanregConfig) -> anyhow::Result<Self> {
        let pool = connect(config).await?;
        let directory =
            Arc::new(SqliteDirectory::open(pool.clone(), &config.categories.root).await?);
        let allocator = Arc::new(SqliteSequenceAllocator::new(pool.clone()));
        let options = StoreOptions {
            read_strategy: ReadStrategy::from_capability(config.database.supports_outer_joins),
            write_timeout: config.database.write_timeout_secs.map(Duration::from_secs),
            type_sequence: config.sequences.channel_type.clone(),
        };
        let store = SqliteChannelRegistryStore::new(pool, directory.clone(), allocator, options);
        debug!(strategy = ?store.read_strategy(), "registry store ready");
        Ok(Self { directory, store })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "chanreg starting");

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config { action } => config_commands::handle_config(action, config_path),
        Commands::Db { action } => db_commands::handle_db(action, &load_config(config_path)?).await,
        Commands::Channel { action } => {
            let app = App::open(&load_config(config_path)?).await?;
            channel_commands::handle_channel(action, &app).await
        },
        Commands::Types { action } => {
            let app = App::open(&load_config(config_path)?).await?;
            type_commands::handle_types(action, &app).await
        },
        Commands::Category { action } => {
            let app = App::open(&load_config(config_path)?).await?;
            category_commands::handle_category(action, &app).await
        },
    }
}
