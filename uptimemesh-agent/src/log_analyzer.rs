//! Log Analyzer: tail-seeks into a log file, parses the
//! configured format, and reduces the surviving window into a
//! [`LogMetrics`] record.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use uptimemesh_core::{LogConfig, LogFormat, LogMetrics, MonitorError, Result};

const AVERAGE_LINE_BYTES: u64 = 200;
const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);
const SMALL_FILE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const SMALL_FILE_THRESHOLD_BYTES: u64 = 10 * 1024;
const TOP_ERRORS_LIMIT: usize = 5;

struct Entry {
    timestamp: Option<DateTime<Utc>>,
    status_code: Option<u16>,
    response_time: Option<f64>,
    url: Option<String>,
}

static NGINX_APACHE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<remote_addr>\S+) \S+ \S+ \[(?P<timestamp>[^\]]+)\] "(?P<method>\S+) (?P<url>\S+)[^"]*" (?P<status_code>\d{3}) (?P<bytes_sent>\S+)(?: "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)")?(?: (?P<request_time>[\d.]+))?"#,
    )
    .expect("nginx/apache log regex is valid")
});

fn parse_combined_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z").ok().map(|dt| dt.with_timezone(&Utc))
}

fn parse_nginx_apache_line(line: &str, is_nginx: bool) -> Option<Entry> {
    let caps = NGINX_APACHE.captures(line)?;
    let status_code = caps.name("status_code").and_then(|m| m.as_str().parse().ok());
    let timestamp = caps.name("timestamp").and_then(|m| parse_combined_log_timestamp(m.as_str()));
    let url = caps.name("url").map(|m| m.as_str().to_string());
    let response_time = if is_nginx {
        caps.name("request_time").and_then(|m| m.as_str().parse::<f64>().ok()).map(|secs| secs * 1000.0)
    } else {
        None
    };
    Some(Entry { timestamp, status_code, response_time, url })
}

fn parse_json_line(line: &str) -> Option<Entry> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let status_code = value.get("status_code").and_then(|v| v.as_u64()).map(|n| n as u16);
    let response_time = value.get("response_time").and_then(|v| v.as_f64());
    let url = value.get("url").and_then(|v| v.as_str()).map(String::from);
    Some(Entry { timestamp, status_code, response_time, url })
}

fn parse_custom_line(re: &Regex, line: &str) -> Option<Entry> {
    let caps = re.captures(line)?;
    let timestamp = caps
        .name("timestamp")
        .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok().or_else(|| parse_combined_log_timestamp(m.as_str())))
        .map(|dt| dt.with_timezone(&Utc));
    let status_code = caps.name("status_code").and_then(|m| m.as_str().parse().ok());
    let response_time = caps.name("response_time").and_then(|m| m.as_str().parse().ok());
    let url = caps.name("url").map(|m| m.as_str().to_string());
    Some(Entry { timestamp, status_code, response_time, url })
}

enum Parser {
    Nginx,
    Apache,
    Json,
    Custom(Regex),
}

impl Parser {
    fn build(config: &LogConfig) -> Result<Self> {
        match config.format {
            LogFormat::Nginx => Ok(Parser::Nginx),
            LogFormat::Apache => Ok(Parser::Apache),
            LogFormat::Json => Ok(Parser::Json),
            LogFormat::Custom => {
                let pattern = config
                    .custom_pattern
                    .as_deref()
                    .ok_or_else(|| MonitorError::validation("custom log format requires custom_pattern"))?;
                let re = Regex::new(pattern).map_err(|e| MonitorError::validation(format!("invalid custom_pattern: {e}")))?;
                Ok(Parser::Custom(re))
            }
        }
    }

    fn parse(&self, line: &str) -> Option<Entry> {
        match self {
            Parser::Nginx => parse_nginx_apache_line(line, true),
            Parser::Apache => parse_nginx_apache_line(line, false),
            Parser::Json => parse_json_line(line),
            Parser::Custom(re) => parse_custom_line(re, line),
        }
    }
}

/// Seeks to roughly the last `tail_lines` of the file (heuristic: 200
/// bytes/line) and returns a reader positioned there, plus the file size.
fn open_tail(path: &str, tail_lines: u64) -> Result<(BufReader<std::fs::File>, u64)> {
    let mut file = std::fs::File::open(path).map_err(|e| MonitorError::validation(format!("cannot open log file: {e}")))?;
    let size = file.metadata().map_err(|e| MonitorError::validation(format!("cannot stat log file: {e}")))?.len();
    let approx_tail_bytes = tail_lines.saturating_mul(AVERAGE_LINE_BYTES);
    let seek_to = size.saturating_sub(approx_tail_bytes);
    file.seek(SeekFrom::Start(seek_to)).map_err(|e| MonitorError::validation(format!("cannot seek log file: {e}")))?;
    Ok((BufReader::new(file), size))
}

fn window_for(size: u64) -> Duration {
    if size < SMALL_FILE_THRESHOLD_BYTES {
        SMALL_FILE_WINDOW
    } else {
        DEFAULT_WINDOW
    }
}

pub fn analyze(config: &LogConfig, timeout: Duration) -> Result<LogMetrics> {
    let started = Instant::now();
    let (reader, size) = open_tail(&config.file_path, config.tail_lines)?;
    let window = window_for(size);
    let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(300));
    let parser = Parser::build(config)?;

    let mut total_requests = 0u64;
    let mut error_requests = 0u64;
    let mut status_codes: BTreeMap<u16, u64> = BTreeMap::new();
    let mut response_time_sum = 0f64;
    let mut response_time_count = 0u64;
    let mut error_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut lines_analyzed = 0u64;

    for line in reader.lines() {
        if started.elapsed() > timeout {
            return Err(MonitorError::Probe("log analysis exceeded the configured timeout".into()));
        }
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let Some(entry) = parser.parse(&line) else { continue };
        if let Some(ts) = entry.timestamp {
            if ts < cutoff {
                continue;
            }
        }

        lines_analyzed += 1;
        total_requests += 1;

        if let Some(code) = entry.status_code {
            *status_codes.entry(code).or_insert(0) += 1;
            if config.is_error_code(code) {
                error_requests += 1;
                let url = entry.url.clone().unwrap_or_default();
                *error_counts.entry(format!("{code} {url}")).or_insert(0) += 1;
            }
        }
        if let Some(rt) = entry.response_time {
            response_time_sum += rt;
            response_time_count += 1;
        }
    }

    let error_rate = if total_requests > 0 { (error_requests as f64 / total_requests as f64) * 100.0 } else { 0.0 };
    let window_minutes = (window.as_secs_f64() / 60.0).max(1.0 / 60.0);
    let requests_per_minute = total_requests as f64 / window_minutes;
    let avg_response_time = if response_time_count > 0 { Some(response_time_sum / response_time_count as f64) } else { None };

    let mut top_errors: Vec<(String, u64)> = error_counts.into_iter().collect();
    top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_errors.truncate(TOP_ERRORS_LIMIT);

    Ok(LogMetrics {
        total_requests,
        error_requests,
        error_rate,
        avg_response_time,
        requests_per_minute,
        status_codes,
        top_errors,
        lines_analyzed,
    })
}

/// Status mapping for the probe result: strictly greater than
/// the boundary, so `error_rate == 20.0` is `up`, not `degraded`.
pub fn status_for(metrics: &LogMetrics) -> uptimemesh_core::ResultStatus {
    if metrics.error_rate > 50.0 {
        uptimemesh_core::ResultStatus::Down
    } else if metrics.error_rate > 20.0 {
        uptimemesh_core::ResultStatus::Degraded
    } else {
        uptimemesh_core::ResultStatus::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    fn write_fixture(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn json_config(path: &str) -> LogConfig {
        LogConfig {
            file_path: path.to_string(),
            format: LogFormat::Json,
            custom_pattern: None,
            tail_lines: 1000,
            encoding: "utf-8".into(),
            error_codes: HashSet::new(),
        }
    }

    fn entry_line(status: u16, seconds_ago: i64) -> String {
        let ts = (Utc::now() - chrono::Duration::seconds(seconds_ago)).to_rfc3339();
        format!(r#"{{"timestamp":"{ts}","status_code":{status},"url":"/","response_time":12.5}}"#)
    }

    #[test]
    fn json_fixture_is_parsed_and_error_rate_is_boundary_correct() {
        let lines: Vec<String> = (0..10).map(|i| entry_line(if i < 2 { 500 } else { 200 }, i)).collect();
        let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = write_fixture(&line_refs);
        let config = json_config(file.path().to_str().unwrap());
        let metrics = analyze(&config, Duration::from_secs(5)).unwrap();

        assert_eq!(metrics.total_requests, 10);
        assert_eq!(metrics.error_requests, 2);
        assert_eq!(metrics.error_rate, 20.0);
        assert_eq!(status_for(&metrics), uptimemesh_core::ResultStatus::Up);
    }

    #[test]
    fn error_rate_over_twenty_is_degraded_not_up() {
        let metrics = LogMetrics { error_rate: 20.0001, ..Default::default() };
        assert_eq!(status_for(&metrics), uptimemesh_core::ResultStatus::Degraded);
    }

    #[test]
    fn error_rate_over_fifty_is_down() {
        let metrics = LogMetrics { error_rate: 50.1, ..Default::default() };
        assert_eq!(status_for(&metrics), uptimemesh_core::ResultStatus::Down);
    }

    #[test]
    fn small_file_uses_twenty_four_hour_window() {
        assert_eq!(window_for(100), SMALL_FILE_WINDOW);
        assert_eq!(window_for(SMALL_FILE_THRESHOLD_BYTES + 1), DEFAULT_WINDOW);
    }

    #[test]
    fn custom_pattern_missing_is_a_validation_error() {
        let config = LogConfig {
            file_path: "/dev/null".into(),
            format: LogFormat::Custom,
            custom_pattern: None,
            tail_lines: 10,
            encoding: "utf-8".into(),
            error_codes: HashSet::new(),
        };
        assert!(Parser::build(&config).is_err());
    }
}
