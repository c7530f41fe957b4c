mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use blobstash::config::StashConfig;

#[derive(Parser)]
#[command(name = "blobstash")]
#[command(about = "Keyed file storage with paginated listing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, help = "Config file path")]
    config: Option<String>,

    #[arg(long, help = "Data directory path (overrides config)")]
    data: Option<String>,

    #[arg(long, help = "Deployment context selecting the namespace (overrides config)")]
    context: Option<String>,

    #[arg(long, help = "Listen address (overrides config)")]
    listen: Option<String>,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Serve stored files over HTTP
    Serve,
    /// Store a local file under an explicit key
    Put {
        key: String,
        path: String,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long, help = "Stored file name (defaults to the local file name)")]
        name: Option<String>,
    },
    /// Store a local file under a generated upload key
    Upload {
        field: String,
        path: String,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },
    /// Fetch a stored file
    Get {
        key: String,
        #[arg(long, help = "Write content to this path instead of stdout")]
        out: Option<String>,
    },
    /// Check whether a key exists
    Has { key: String },
    /// Delete a key
    Rm { key: String },
    /// List keys one page at a time
    Ls {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, help = "Include name, type, size and modification time")]
        metadata: bool,
        #[arg(long, help = "Follow cursors to the end of the listing")]
        all: bool,
    },
    GenerateConfig {
        #[arg(long, default_value = "blobstash.toml", help = "Config file path")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blobstash=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        StashConfig::default().save(output)?;
        if cli.json {
            println!("{}", serde_json::json!({"success": true, "config_file": output}));
        } else {
            println!("✅ Generated config file: {}", output);
        }
        return Ok(());
    }

    let mut config = StashConfig::load_or_create(cli.config.as_deref())?;

    if let Some(data) = cli.data {
        config.data_directory = data.into();
    }
    if let Some(context) = cli.context {
        config.deploy_context = context;
    }
    if let Some(listen) = cli.listen {
        config.listen_address = listen;
    }

    if let Err(e) = config.ensure_directories() {
        if cli.json {
            println!("{}", serde_json::json!({"error": format!("Failed to create directories: {}", e)}));
        } else {
            eprintln!("❌ Failed to create directories: {}", e);
        }
        return Err(e);
    }

    if !matches!(cli.command, Commands::Serve) {
        if let Err(e) = config.require_persistent() {
            if cli.json {
                println!("{}", serde_json::json!({"error": e.to_string()}));
            } else {
                eprintln!("❌ {}", e);
            }
            return Err(e);
        }
    }

    let store = config.open_store();
    let json = cli.json;

    match cli.command {
        Commands::Serve => blobstash::server::run(&config, store).await,
        Commands::Put { key, path, mime, name } => {
            cli::put(&store, &config, &key, &path, &mime, name, json).await
        }
        Commands::Upload { field, path, mime } => {
            cli::upload(&store, &config, &field, &path, &mime, json).await
        }
        Commands::Get { key, out } => cli::get(&store, &key, out.as_deref(), json).await,
        Commands::Has { key } => cli::has(&store, &key, json).await,
        Commands::Rm { key } => cli::remove(&store, &key, json).await,
        Commands::Ls { prefix, limit, cursor, metadata, all } => {
            let options = blobstash::ListOptions {
                prefix,
                limit,
                cursor,
                include_metadata: metadata,
            };
            cli::list(&store, options, all, json).await
        }
        Commands::GenerateConfig { .. } => Ok(()),
    }
}
