//! CLI for the Mercure hub
//!
//! Subcommands:
//! - `serve` (default): run the hub
//! - `token`: mint a JWT for publishers or subscribers, handy for smoke tests

use chrono::Utc;
use clap::{Parser, Subcommand};
use mercure_hub::auth::{AuthorizationClaims, SigningKey};
use mercure_hub::broker::Hub;
use mercure_hub::config::{Settings, load_config_from};
use mercure_hub::transport::start_http_server;
use mercure_hub::utils::logging;
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mercure-hub", version, about = "A standalone Mercure hub")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, short, env = "MERCURE_CONFIG", default_value = "config/default")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub
    Serve,
    /// Print a signed JWT
    Token {
        /// Topic selector the token may publish to (repeatable)
        #[arg(long)]
        publish: Vec<String>,
        /// Topic selector the token may subscribe to (repeatable)
        #[arg(long)]
        subscribe: Vec<String>,
        /// Lifetime in seconds; no `exp` claim when omitted
        #[arg(long)]
        ttl_secs: Option<u64>,
        /// Signing key; defaults to `jwt.key`. Asymmetric algorithms need the private key here.
        #[arg(long)]
        key: Option<String>,
        /// Signing algorithm; defaults to `jwt.algorithm`
        #[arg(long)]
        algorithm: Option<String>,
        /// `kid` header to stamp
        #[arg(long)]
        kid: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = load_config_from(&cli.config)?;
    logging::init(&settings.log.level);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            if let Err(e) = run_server(settings).await {
                error!("Hub failed: {}", e);
                return Err(e);
            }
        }
        Command::Token {
            publish,
            subscribe,
            ttl_secs,
            key,
            algorithm,
            kid,
        } => {
            let mut claims = AuthorizationClaims::new(publish, subscribe);
            if let Some(ttl) = ttl_secs {
                let exp = Utc::now().timestamp().saturating_add_unsigned(ttl);
                claims.additional.insert("exp".into(), Value::from(exp));
            }
            let algorithm = algorithm.unwrap_or_else(|| settings.jwt.algorithm.clone());
            let key = key.unwrap_or_else(|| settings.jwt.key.clone());
            let token = SigningKey::from_config(&algorithm, &key)?.sign(&claims, kid.as_deref())?;
            println!("{token}");
        }
    }

    Ok(())
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.uses_default_key() {
        warn!("using the default JWT key; set MERCURE__JWT__KEY before exposing the hub");
    }

    let hub = Hub::new(settings)?;

    let signal_hub = hub.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Exiting gracefully.");
            signal_hub.shutdown();
        }
    });

    start_http_server(hub).await?;
    Ok(())
}
