use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP API over the Telegram bridge). Set TELEGRAM_BRIDGE_URL or channels.telegram.apiBase to enable /search and /click.
    Gateway {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send a query through a running gateway and print the parsed reply.
    Search {
        /// Config file path, used to locate the gateway
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Query text sent to the bot
        query: String,
    },

    /// Press a button on one of the bot's messages through a running gateway.
    Click {
        /// Config file path, used to locate the gateway
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Id of the message carrying the button (msg_id in a previous reply)
        message_id: i64,

        /// Button label; a partial label matches when no button matches exactly
        button_text: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Search { config, query }) => {
            let body = serde_json::json!({ "query": query });
            if let Err(e) = post_to_gateway(config, "/search", body).await {
                eprintln!("search failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Click {
            config,
            message_id,
            button_text,
        }) => {
            let body = serde_json::json!({ "message_id": message_id, "button_text": button_text });
            if let Err(e) = post_to_gateway(config, "/click", body).await {
                eprintln!("click failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lib::gateway::run_gateway(config).await
}

/// POST `body` to the configured gateway and pretty-print the JSON answer.
/// Non-2xx answers are errors carrying the gateway's `detail`.
async fn post_to_gateway(
    config_path: Option<std::path::PathBuf>,
    path: &str,
    body: serde_json::Value,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let url = format!(
        "http://{}:{}{}",
        config.gateway.bind.trim(),
        config.gateway.port,
        path
    );
    let res = reqwest::Client::new().post(&url).json(&body).send().await?;
    let status = res.status();
    let json: serde_json::Value = res.json().await?;
    if !status.is_success() {
        let detail = json
            .get("detail")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        anyhow::bail!("{} {}", status, detail);
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
