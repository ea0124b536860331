use clap::{Parser, Subcommand};
use tracing::info;

use agentrun_core::Config;

use agentrun_server::router;
use agentrun_server::state::AppState;

/// Agent Run Engine server.
#[derive(Parser)]
#[command(name = "agentrun-server")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default if no subcommand is given).
    Serve,
    /// Mark any run left `running` from a previous process as `failed`, then exit.
    RestoreCheck,
}

fn load_config() -> Config {
    agentrun_core::config::load_dotenv();
    Config::from_env()
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();

    let state = AppState::new(config.clone())?;
    let recovered = state.supervisor.restore().await?;
    if recovered > 0 {
        info!(recovered, "marked stale running agent runs as failed on startup");
    }

    let app = router::build_router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "agentrun-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn restore_check(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config)?;
    let recovered = state.supervisor.restore().await?;
    println!("marked {recovered} stale running agent run(s) as failed");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let args = Args::parse();
    let config = load_config();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::RestoreCheck => restore_check(config).await,
    }
}
