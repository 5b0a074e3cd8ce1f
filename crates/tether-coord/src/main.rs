use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tether_coord::Coordinator;
use tether_coord::CoordinatorConfig;
use tether_coord::control;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

/// Routes commands from stdin to connected tether clients, one line at a time.
///
/// Control lines carry no id, so each reply is written before the next line
/// is read; a slow device delays every later command.
#[derive(Parser, Debug)]
#[command(name = "tether-coord", version)]
struct Cli {
    /// Address to accept client links on
    #[arg(long, default_value = "127.0.0.1:8347")]
    bind: SocketAddr,

    /// Per-request response timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// How long a new link may take to send its handshake, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries control responses only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = CoordinatorConfig::default()
        .with_bind(cli.bind)
        .with_request_timeout(Duration::from_millis(cli.timeout_ms))
        .with_handshake_timeout(Duration::from_millis(cli.handshake_timeout_ms));

    let coordinator = Arc::new(Coordinator::new(config));
    let listener = coordinator.bind().await?;
    let server = tokio::spawn(coordinator.clone().serve(listener));

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = control::handle_line(&coordinator, &line).await;
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    server.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn help_states_line_at_a_time_processing() {
        Cli::command().debug_assert();
        let about = Cli::command().get_about().map(ToString::to_string).unwrap_or_default();
        assert!(about.contains("one line at a time"), "{about}");
    }

    #[test]
    fn flags_default_to_loopback() {
        let cli = Cli::try_parse_from(["tether-coord"]).unwrap();
        assert_eq!(cli.bind, "127.0.0.1:8347".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.timeout_ms, 10_000);
        assert_eq!(cli.handshake_timeout_ms, 5_000);
    }
}
