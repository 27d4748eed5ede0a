use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use controller::config_store::ConfigDoc;
use controller::http::{router, AppState};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "controller", about = "Media stream controller: config store and API")]
struct Cli {
    /// Address to listen on for the HTTP API.
    #[arg(long, default_value = "0.0.0.0:4242")]
    listen: SocketAddr,

    /// Instance id reported in every API response's `config.iid`.
    #[arg(long, default_value = "controller")]
    iid: String,

    /// Where the `save` command persists the config document. Without
    /// this, `save` is a logged no-op.
    #[arg(long)]
    config_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::logging::init(0);
    let cli = Cli::parse();

    let mut doc = ConfigDoc::new(cli.iid, env!("CARGO_PKG_VERSION"));
    if let Some(path) = cli.config_path {
        doc = doc.with_config_path(path);
    }
    let state = Arc::new(AppState::new(doc, || {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }));

    info!(listen = %cli.listen, "controller starting");
    axum::Server::bind(&cli.listen)
        .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}
