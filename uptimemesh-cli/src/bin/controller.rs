use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use uptimemesh_controller::ControllerConfig;

/// Run the uptimemesh controller: session manager, ingestion pipeline,
/// and the admin/agent HTTP surfaces.
#[derive(Debug, Parser)]
#[command(name = "uptimemesh-controller", version)]
struct Args {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "UPTIMEMESH_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    /// Path to the SQLite database file (or `:memory:`).
    #[arg(long, env = "UPTIMEMESH_DATABASE_PATH", default_value = "uptimemesh.db")]
    database_path: String,

    /// Path to the bootstrap key file, created on first run if absent.
    #[arg(long, env = "UPTIMEMESH_BOOTSTRAP_KEY_PATH", default_value = "uptimemesh-bootstrap.key")]
    bootstrap_key_path: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> ExitCode {
    uptimemesh_telemetry::init_default("uptimemesh-controller");

    let config = ControllerConfig::new(args.bind_addr, args.database_path, args.bootstrap_key_path);

    match uptimemesh_controller::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "controller exited with an error");
            ExitCode::FAILURE
        }
    }
}
