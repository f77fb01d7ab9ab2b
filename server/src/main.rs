use anyhow::Result;
use axum::Router;
use clap::Parser;
use sift_server::build_app;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Corpus root directory
    #[arg(long)]
    corpus: String,
    /// Seed document id; omit to index the whole corpus without crawling
    #[arg(long)]
    seed: Option<String>,
    /// Maximum pages the startup crawl may visit
    #[arg(long)]
    max_pages: Option<usize>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let app: Router = build_app(&args.corpus, args.seed.as_deref(), args.max_pages)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
