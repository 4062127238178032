//! Ping probe: shells out to the OS `ping` utility with
//! count=1. Windows takes `-n 1 -w <ms>`; every other platform takes
//! `-c 1 -W <seconds>`.

use std::time::{Duration, Instant};
use uptimemesh_core::{ResultMetadata, ResultStatus};

use super::ProbeOutcome;

fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    if cfg!(target_os = "windows") {
        vec!["-n".into(), "1".into(), "-w".into(), timeout.as_millis().to_string(), host.into()]
    } else {
        let secs = timeout.as_secs().max(1);
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), host.into()]
    }
}

pub async fn probe(host: &str, timeout: Duration) -> ProbeOutcome {
    let args = ping_args(host, timeout);
    let started = Instant::now();
    let output = tokio::process::Command::new("ping").args(&args).output().await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match output {
        Ok(output) => {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if output.status.success() {
                ProbeOutcome {
                    status: ResultStatus::Up,
                    response_time: Some(elapsed_ms),
                    status_code: None,
                    error_message: None,
                    metadata: ResultMetadata::Ping { output: combined },
                }
            } else {
                ProbeOutcome {
                    status: ResultStatus::Down,
                    response_time: Some(elapsed_ms),
                    status_code: None,
                    error_message: Some(format!("ping exited with {}", output.status)),
                    metadata: ResultMetadata::Ping { output: combined },
                }
            }
        }
        Err(e) => ProbeOutcome {
            status: ResultStatus::Down,
            response_time: Some(elapsed_ms),
            status_code: None,
            error_message: Some(format!("failed to spawn ping: {e}")),
            metadata: ResultMetadata::Empty,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_args_use_dash_c_and_dash_w() {
        if !cfg!(target_os = "windows") {
            let args = ping_args("8.8.8.8", Duration::from_secs(5));
            assert_eq!(args, vec!["-c", "1", "-W", "5", "8.8.8.8"]);
        }
    }

    #[test]
    fn windows_args_use_dash_n_and_milliseconds() {
        if cfg!(target_os = "windows") {
            let args = ping_args("8.8.8.8", Duration::from_secs(5));
            assert_eq!(args, vec!["-n", "1", "-w", "5000", "8.8.8.8"]);
        }
    }
}
