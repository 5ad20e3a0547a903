// Draft server entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config/server.toml
// 3. Bind the listener
// 4. Create the draft supervisor
// 5. Run the accept loop until the process is stopped

use draft_server::config;
use draft_server::draft::DraftSupervisor;
use draft_server::server;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Draft server starting up");

    // 2. Load config
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let server_config =
        config::load_server_config(&cwd).context("failed to load configuration")?;
    info!(
        "Config loaded: port={}, drafts_dir={}",
        server_config.port,
        server_config.drafts_dir.display()
    );

    // 3. Bind the listener
    let listener = TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;

    // 4. Create the draft supervisor (coordinators spawn on first connection)
    let supervisor = DraftSupervisor::new(server_config.drafts_dir);

    // 5. Accept loop
    server::run(listener, supervisor).await
}

/// Initialize tracing to stderr, honoring RUST_LOG when set.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draft_server=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
