//! HTTP/HTTPS probe: `GET` with the configured User-Agent and
//! task timeout; `2xx`/`3xx` is `up`, `4xx`/`5xx` is `down`, transport
//! failure is `down` with the error string.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uptimemesh_core::ResultMetadata;

use super::ProbeOutcome;

pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration, user_agent: &str) -> ProbeOutcome {
    let started = Instant::now();
    let result = client.get(url).timeout(timeout).header(reqwest::header::USER_AGENT, user_agent).send().await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let content_length = response.content_length();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
                .collect();

            let (status, error_message) = if response.status().is_success() || response.status().is_redirection() {
                (uptimemesh_core::ResultStatus::Up, None)
            } else {
                (uptimemesh_core::ResultStatus::Down, Some(format!("HTTP {status_code}")))
            };

            ProbeOutcome {
                status,
                response_time: Some(elapsed_ms),
                status_code: Some(status_code),
                error_message,
                metadata: ResultMetadata::Http { headers, content_length },
            }
        }
        Err(e) => ProbeOutcome {
            status: uptimemesh_core::ResultStatus::Down,
            response_time: Some(elapsed_ms),
            status_code: None,
            error_message: Some(e.to_string()),
            metadata: ResultMetadata::Empty,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_reported_down_with_error_message() {
        let client = reqwest::Client::new();
        let outcome = probe(&client, "http://127.0.0.1:1", Duration::from_millis(200), "uptimemesh-agent/test").await;
        assert_eq!(outcome.status, uptimemesh_core::ResultStatus::Down);
        assert!(outcome.error_message.is_some());
        assert!(outcome.status_code.is_none());
    }
}
