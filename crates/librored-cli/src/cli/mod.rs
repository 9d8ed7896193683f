//! CLI entry and dispatch.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use librored_core::api::ApiClient;
use librored_core::auth::{AuthSession, TokenStore};
use librored_core::config;
use librored_core::logging::{self, WorkerGuard};

mod commands;

#[derive(Parser)]
#[command(name = "librored")]
#[command(version)]
#[command(about = "LibroRed catalog and loan service client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides LIBRORED_BASE_URL and config)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in and store the issued tokens
    Login {
        #[arg(short, long)]
        username: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account (does not log in)
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Clear the stored session
    Logout,

    /// Show the current session
    Whoami,

    /// Send an authenticated API request
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        #[arg(value_name = "METHOD")]
        method: String,

        /// Path relative to the base URL, e.g. books/3
        #[arg(value_name = "PATH")]
        path: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,

        /// Query parameter, repeatable
        #[arg(short, long, value_name = "KEY=VALUE", value_parser = commands::request::parse_query_pair)]
        query: Vec<(String, String)>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Generate a fresh config from Rust defaults (for xtask)
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { command, base_url } = cli;
    let base_url = base_url.as_deref();

    match command {
        Commands::Login { username, password } => {
            let session = Session::open(base_url)?;
            commands::auth::login(&session.client, &username, password).await
        }
        Commands::Register {
            username,
            email,
            password,
        } => {
            let session = Session::open(base_url)?;
            commands::auth::register(&session.client, &username, &email, password).await
        }
        Commands::Logout => {
            let session = Session::open(base_url)?;
            commands::auth::logout(&session.client).await
        }
        Commands::Whoami => {
            let session = Session::open(base_url)?;
            commands::auth::whoami(session.client.session());
            Ok(())
        }
        Commands::Request {
            method,
            path,
            data,
            query,
        } => {
            let session = Session::open(base_url)?;
            commands::request::run(
                &session.client,
                commands::request::RequestOptions {
                    method: &method,
                    path: &path,
                    data: data.as_deref(),
                    query,
                },
            )
            .await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}

/// Loaded config, logging and the request pipeline for one command.
struct Session {
    client: ApiClient,
    _log_guard: Option<WorkerGuard>,
}

impl Session {
    fn open(base_url: Option<&str>) -> Result<Self> {
        let mut config = config::Config::load().context("load config")?;
        if let Some(url) = base_url {
            config.base_url = url.to_string();
        }

        let log_guard = logging::init(&config.logging).context("init logging")?;

        let store = TokenStore::open_default().context("open token store")?;
        let session = Arc::new(AuthSession::new(store));
        let client = ApiClient::new(&config, session)?;
        tracing::debug!(
            base_url = %client.base_url(),
            logged_in = client.session().is_logged_in(),
            "Session opened"
        );

        Ok(Self {
            client,
            _log_guard: log_guard,
        })
    }
}
