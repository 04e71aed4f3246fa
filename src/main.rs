use clap::Parser;
use stomp_proxy::{config::Config, server::ProxyListener, Result};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "stomp-proxy")]
#[command(about = "An intercepting proxy for STOMP connections")]
struct Cli {
    #[arg(short, long)]
    listen_host: Option<String>,

    #[arg(short = 'p', long)]
    listen_port: Option<u16>,

    /// Broker address as host:port
    #[arg(short, long)]
    upstream: Option<String>,

    /// Forward client traffic without interception
    #[arg(long)]
    client_passthrough: bool,

    /// Forward broker traffic without interception
    #[arg(long)]
    server_passthrough: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting stomp-proxy");

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    if let Some(host) = cli.listen_host {
        config.listen_host = host;
    }
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }
    if let Some(upstream) = cli.upstream {
        let (host, port) = upstream.rsplit_once(':').ok_or_else(|| {
            stomp_proxy::Error::Other(format!("upstream must be host:port, got {}", upstream))
        })?;
        config.upstream_host = host.to_string();
        config.upstream_port = port
            .parse()
            .map_err(|e| stomp_proxy::Error::Other(format!("invalid upstream port {}: {}", port, e)))?;
    }
    config.proxy.client_passthrough |= cli.client_passthrough;
    config.proxy.server_passthrough |= cli.server_passthrough;

    let listener = ProxyListener::bind(config).await?;
    listener.run().await?;

    Ok(())
}
