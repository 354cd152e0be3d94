//! Share a directory or a fixed body over HTTP until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fileshare")]
#[command(about = "Serve a directory or fixed content over HTTP to test machines")]
#[command(group(ArgGroup::new("source").required(true).args(["dir", "content"])))]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "9099")]
    port: u16,

    /// Directory to serve
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Body returned for every request
    #[arg(long)]
    content: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fileshare=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => {
                warn!(err = %err, "cannot listen for interrupts, serving until killed");
                std::future::pending::<()>().await;
            }
        }
    };

    match (args.dir, args.content) {
        (Some(dir), _) => fileshare::serve_dir(dir, addr, shutdown).await,
        (None, Some(content)) => fileshare::serve_content(content, addr, shutdown).await,
        (None, None) => anyhow::bail!("either --dir or --content is required"),
    }
}
