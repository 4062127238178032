use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use uptimemesh_agent::AgentConfig;

/// Run the uptimemesh agent: connects to a controller, executes assigned
/// monitor tasks, and reports results.
#[derive(Debug, Parser)]
#[command(name = "uptimemesh-agent", version)]
struct Args {
    /// Base URL of the controller (http(s)://host:port).
    #[arg(long, env = "UPTIMEMESH_CONTROLLER_URL")]
    controller_url: String,

    /// API key presented to the controller (bootstrap or permanent).
    #[arg(long, env = "UPTIMEMESH_API_KEY")]
    api_key: String,

    /// Self-declared external agent id.
    #[arg(long, env = "UPTIMEMESH_AGENT_ID")]
    agent_id: String,

    /// Interval between checks and heartbeats, e.g. "30s".
    #[arg(long, env = "UPTIMEMESH_CHECK_INTERVAL", default_value = "30s")]
    check_interval: String,

    /// Where to persist an upgraded permanent key, if any.
    #[arg(long, env = "UPTIMEMESH_KEY_FILE")]
    key_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let check_interval = match humantime::parse_duration(&args.check_interval) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("invalid --check-interval '{}': {e}", args.check_interval);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(async_main(args, check_interval))
}

async fn async_main(args: Args, check_interval: Duration) -> ExitCode {
    uptimemesh_telemetry::init_default("uptimemesh-agent");

    let config = AgentConfig {
        controller_url: args.controller_url,
        api_key: args.api_key,
        agent_id: args.agent_id,
        check_interval,
        user_agent: format!("uptimemesh-agent/{}", env!("CARGO_PKG_VERSION")),
        key_file_path: args.key_file,
    };

    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::from(2);
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_cancel.cancel();
    });

    match uptimemesh_agent::run(config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
