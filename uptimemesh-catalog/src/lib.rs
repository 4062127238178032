//! Task Catalog: normalizes [`Resource`]s into executable [`MonitorTask`]s.
//!
//! A Resource's URL scheme fully determines its `monitor_type`; `ping://`
//! and `log://` have their scheme prefix stripped before the URL becomes
//! the task's effective execution target.

use std::time::Duration;
use uptimemesh_core::{MonitorError, MonitorTask, MonitorType, Resource, Result, TaskId};

/// Minimum and maximum `scan_interval` the Catalog will accept. A
/// dashboard-side "interval too aggressive" warning is layered on top of
/// these bounds elsewhere, not implemented here.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Split a Resource URL into its `MonitorType` and the URL the probe should
/// actually dial (scheme-stripped for `ping`/`log`).
pub fn parse_resource_url(url: &str) -> Result<(MonitorType, String)> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok((MonitorType::Https, format!("https://{rest}")))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok((MonitorType::Http, format!("http://{rest}")))
    } else if let Some(rest) = url.strip_prefix("ping://") {
        if rest.is_empty() {
            return Err(MonitorError::validation("ping:// URL is missing a host"));
        }
        Ok((MonitorType::Ping, rest.to_string()))
    } else if let Some(rest) = url.strip_prefix("log://") {
        if rest.is_empty() {
            return Err(MonitorError::validation("log:// URL is missing a path"));
        }
        Ok((MonitorType::Log, rest.to_string()))
    } else {
        Err(MonitorError::validation(format!(
            "unrecognized URL scheme in '{url}' (expected http|https|ping|log)"
        )))
    }
}

pub fn parse_scan_interval(raw: &str) -> Result<Duration> {
    let dur = humantime::parse_duration(raw)
        .map_err(|e| MonitorError::validation(format!("invalid scan_interval '{raw}': {e}")))?;
    if dur < MIN_INTERVAL || dur > MAX_INTERVAL {
        return Err(MonitorError::validation(format!(
            "scan_interval {raw} is out of bounds [{MIN_INTERVAL:?}, {MAX_INTERVAL:?}]"
        )));
    }
    Ok(dur)
}

/// Derive the executable task for a Resource. `id` is the pre-allocated
/// task id (callers reconcile against the Store so exactly one task exists
/// per resource at all times).
pub fn derive_task(resource: &Resource, id: TaskId) -> Result<MonitorTask> {
    let (monitor_type, effective_url) = parse_resource_url(&resource.url)?;
    let interval = parse_scan_interval(&resource.scan_interval)?;

    Ok(MonitorTask {
        id,
        resource_id: resource.id,
        monitor_type,
        url: effective_url,
        interval,
        timeout: monitor_type.default_timeout(),
        enabled: true,
        log_config: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uptimemesh_core::ResourceId;

    fn resource(url: &str, interval: &str) -> Resource {
        Resource {
            id: ResourceId::from(1),
            url: url.to_string(),
            name: "example".to_string(),
            scan_interval: interval.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn https_resource_keeps_full_url_and_type() {
        let r = resource("https://httpbin.org/status/200", "30s");
        let task = derive_task(&r, TaskId::from(1)).unwrap();
        assert_eq!(task.monitor_type, MonitorType::Https);
        assert_eq!(task.url, "https://httpbin.org/status/200");
        assert_eq!(task.interval, Duration::from_secs(30));
        assert_eq!(task.timeout, Duration::from_secs(30));
    }

    #[test]
    fn ping_resource_strips_scheme() {
        let r = resource("ping://8.8.8.8", "60s");
        let task = derive_task(&r, TaskId::from(1)).unwrap();
        assert_eq!(task.monitor_type, MonitorType::Ping);
        assert_eq!(task.url, "8.8.8.8");
        assert_eq!(task.timeout, Duration::from_secs(5));
    }

    #[test]
    fn log_resource_strips_scheme_and_keeps_absolute_path() {
        let r = resource("log:///var/log/nginx/access.log", "60s");
        let task = derive_task(&r, TaskId::from(1)).unwrap();
        assert_eq!(task.monitor_type, MonitorType::Log);
        assert_eq!(task.url, "/var/log/nginx/access.log");
        assert_eq!(task.timeout, Duration::from_secs(60));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let r = resource("ftp://example.com", "30s");
        assert!(derive_task(&r, TaskId::from(1)).is_err());
    }

    #[test]
    fn interval_out_of_bounds_is_rejected() {
        let r = resource("https://example.com", "100h");
        assert!(derive_task(&r, TaskId::from(1)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn monitor_type_is_determined_by_scheme_alone(host in "[a-z0-9.]{3,20}") {
            let (ping_type, _) = parse_resource_url(&format!("ping://{host}")).unwrap();
            let (http_type, _) = parse_resource_url(&format!("http://{host}")).unwrap();
            let (https_type, _) = parse_resource_url(&format!("https://{host}")).unwrap();
            prop_assert_eq!(ping_type, MonitorType::Ping);
            prop_assert_eq!(http_type, MonitorType::Http);
            prop_assert_eq!(https_type, MonitorType::Https);
        }
    }
}
