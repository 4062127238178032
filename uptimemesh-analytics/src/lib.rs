//! Analytics Engine: buckets monitor results by a fixed-width
//! time window and computes per-site and aggregate error rates and average
//! latencies.
//!
//! The engine is deliberately storage-agnostic: it operates on a flat slice
//! of [`ResultRow`]s the caller has already joined out of the Store, which
//! keeps it pure and makes its determinism — the same inputs always
//! produce the same output — trivial to test.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uptimemesh_core::{ResourceId, ResultStatus};

/// One joined `monitor_results` row, already carrying whatever the
/// Ingestion Pipeline precomputed for log-sourced results.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub resource_id: ResourceId,
    pub status: ResultStatus,
    pub status_code: Option<u16>,
    pub response_time: Option<f64>,
    /// Present only for log-monitor results; when set it is used directly
    /// instead of being derived from `status`/`status_code`.
    pub error_rate: Option<f64>,
    pub avg_response_time: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SiteMeta {
    pub id: ResourceId,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AnalyticsQuery {
    /// Empty means "all resources in scope".
    pub resource_ids: Vec<ResourceId>,
    pub start: DateTime<Utc>,
    pub interval_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub last_status: Option<ResultStatus>,
    pub last_response_time: Option<f64>,
    pub last_status_code: Option<u16>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsResponse {
    pub data: Vec<Value>,
    pub sites: Vec<SiteSummary>,
}

fn is_error_row(status: ResultStatus, status_code: Option<u16>) -> bool {
    status == ResultStatus::Down || matches!(status_code, Some(code) if (400..=599).contains(&code))
}

fn bucket_start(checked_at: DateTime<Utc>, interval_minutes: i64) -> DateTime<Utc> {
    let interval_secs = interval_minutes.max(1) * 60;
    let epoch = checked_at.timestamp();
    let bucket_epoch = (epoch.div_euclid(interval_secs)) * interval_secs;
    Utc.timestamp_opt(bucket_epoch, 0).single().unwrap_or(checked_at)
}

struct ResourceAccumulator {
    total: u64,
    errors: u64,
    latest_up_response_time: Option<(DateTime<Utc>, f64)>,
    latest_any_response_time: Option<(DateTime<Utc>, f64)>,
    latest_log_metrics: Option<(DateTime<Utc>, f64, Option<f64>)>, // (checked_at, error_rate, avg_rt)
}

impl ResourceAccumulator {
    fn new() -> Self {
        Self {
            total: 0,
            errors: 0,
            latest_up_response_time: None,
            latest_any_response_time: None,
            latest_log_metrics: None,
        }
    }

    fn observe(&mut self, row: &ResultRow) {
        if let Some(error_rate) = row.error_rate {
            let replace = self.latest_log_metrics.map(|(t, _, _)| row.checked_at >= t).unwrap_or(true);
            if replace {
                self.latest_log_metrics = Some((row.checked_at, error_rate, row.avg_response_time));
            }
            return;
        }

        self.total += 1;
        if is_error_row(row.status, row.status_code) {
            self.errors += 1;
        }
        if let Some(rt) = row.response_time {
            let newer = self.latest_any_response_time.map(|(t, _)| row.checked_at >= t).unwrap_or(true);
            if newer {
                self.latest_any_response_time = Some((row.checked_at, rt));
            }
            if row.status == ResultStatus::Up {
                let newer_up =
                    self.latest_up_response_time.map(|(t, _)| row.checked_at >= t).unwrap_or(true);
                if newer_up {
                    self.latest_up_response_time = Some((row.checked_at, rt));
                }
            }
        }
    }

    /// `(response_time, error_rate)` for this bucket/resource pair.
    fn finish(&self) -> (Option<f64>, f64) {
        if let Some((_, error_rate, avg_rt)) = self.latest_log_metrics {
            return (avg_rt, error_rate);
        }
        let response_time =
            self.latest_up_response_time.or(self.latest_any_response_time).map(|(_, rt)| rt);
        let error_rate =
            if self.total == 0 { 0.0 } else { (self.errors as f64 / self.total as f64) * 100.0 };
        (response_time, error_rate)
    }
}

/// Compute the bucketed analytics response for a fixed `(start,
/// interval_minutes)` query. Deterministic: the same `rows`/`query` always
/// produce byte-identical `data`/`sites` JSON.
pub fn compute(rows: &[ResultRow], sites: &[SiteMeta], query: &AnalyticsQuery) -> AnalyticsResponse {
    let scope: Option<std::collections::HashSet<ResourceId>> =
        if query.resource_ids.is_empty() { None } else { Some(query.resource_ids.iter().copied().collect()) };

    let in_scope = |id: ResourceId| scope.as_ref().map(|s| s.contains(&id)).unwrap_or(true);

    let mut buckets: BTreeMap<DateTime<Utc>, BTreeMap<ResourceId, ResourceAccumulator>> = BTreeMap::new();

    for row in rows {
        if row.checked_at < query.start || !in_scope(row.resource_id) {
            continue;
        }
        let bucket = bucket_start(row.checked_at, query.interval_minutes);
        buckets
            .entry(bucket)
            .or_default()
            .entry(row.resource_id)
            .or_insert_with(ResourceAccumulator::new)
            .observe(row);
    }

    let mut data = Vec::with_capacity(buckets.len());
    for (bucket, per_resource) in &buckets {
        let mut obj = Map::new();
        obj.insert("timestamp".into(), Value::String(bucket.format("%H:%M").to_string()));
        obj.insert("full_timestamp".into(), Value::String(bucket.to_rfc3339()));

        let mut response_times = Vec::new();
        let mut error_rates = Vec::new();

        for (resource_id, acc) in per_resource {
            let (response_time, error_rate) = acc.finish();
            let id: i64 = (*resource_id).into();
            obj.insert(
                format!("site_{id}"),
                response_time.map(Value::from).unwrap_or(Value::Null),
            );
            obj.insert(format!("site_{id}_error_rate"), Value::from(error_rate));
            if let Some(rt) = response_time {
                response_times.push(rt);
            }
            error_rates.push(error_rate);
        }

        let average = if response_times.is_empty() {
            Value::Null
        } else {
            Value::from(response_times.iter().sum::<f64>() / response_times.len() as f64)
        };
        let average_error_rate = if error_rates.is_empty() {
            0.0
        } else {
            error_rates.iter().sum::<f64>() / error_rates.len() as f64
        };

        obj.insert("average".into(), average);
        obj.insert("average_error_rate".into(), Value::from(average_error_rate));

        data.push(Value::Object(obj));
    }

    data.sort_by(|a, b| {
        a["full_timestamp"].as_str().unwrap_or_default().cmp(b["full_timestamp"].as_str().unwrap_or_default())
    });

    let mut site_summaries: Vec<SiteSummary> = sites
        .iter()
        .filter(|s| in_scope(s.id))
        .map(|site| {
            let latest = rows
                .iter()
                .filter(|r| r.resource_id == site.id)
                .max_by_key(|r| r.checked_at);
            SiteSummary {
                id: site.id.into(),
                name: site.name.clone(),
                url: site.url.clone(),
                last_status: latest.map(|r| r.status),
                last_response_time: latest.and_then(|r| r.response_time),
                last_status_code: latest.and_then(|r| r.status_code),
                last_checked_at: latest.map(|r| r.checked_at),
            }
        })
        .collect();
    site_summaries.sort_by_key(|s| s.id);

    AnalyticsResponse { data, sites: site_summaries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn row(resource: i64, status: ResultStatus, code: Option<u16>, rt: Option<f64>, at: DateTime<Utc>) -> ResultRow {
        ResultRow {
            resource_id: ResourceId::from(resource),
            status,
            status_code: code,
            response_time: rt,
            error_rate: None,
            avg_response_time: None,
            checked_at: at,
        }
    }

    #[test]
    fn every_result_falls_in_exactly_one_bucket_and_buckets_are_ordered() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![
            row(1, ResultStatus::Up, Some(200), Some(100.0), start),
            row(1, ResultStatus::Up, Some(200), Some(110.0), start + ChronoDuration::minutes(2)),
            row(1, ResultStatus::Down, Some(503), None, start + ChronoDuration::minutes(6)),
        ];
        let sites = vec![SiteMeta { id: ResourceId::from(1), name: "a".into(), url: "https://a".into() }];
        let query = AnalyticsQuery { resource_ids: vec![], start, interval_minutes: 5 };

        let resp = compute(&rows, &sites, &query);
        assert_eq!(resp.data.len(), 2);
        let ts: Vec<&str> = resp.data.iter().map(|d| d["full_timestamp"].as_str().unwrap()).collect();
        let mut sorted = ts.clone();
        sorted.sort();
        assert_eq!(ts, sorted);
    }

    #[test]
    fn determinism_for_fixed_inputs() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![row(1, ResultStatus::Up, Some(200), Some(42.0), start)];
        let sites = vec![SiteMeta { id: ResourceId::from(1), name: "a".into(), url: "https://a".into() }];
        let query = AnalyticsQuery { resource_ids: vec![], start, interval_minutes: 5 };

        let a = serde_json::to_string(&compute(&rows, &sites, &query).data).unwrap();
        let b = serde_json::to_string(&compute(&rows, &sites, &query).data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn log_sourced_error_rate_is_used_directly() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut r = row(1, ResultStatus::Degraded, None, None, start);
        r.error_rate = Some(23.5);
        r.avg_response_time = Some(88.0);
        let sites = vec![SiteMeta { id: ResourceId::from(1), name: "a".into(), url: "log:///x".into() }];
        let query = AnalyticsQuery { resource_ids: vec![], start, interval_minutes: 5 };

        let resp = compute(&[r], &sites, &query);
        let bucket = &resp.data[0];
        assert_eq!(bucket["site_1_error_rate"], 23.5);
        assert_eq!(bucket["site_1"], 88.0);
    }
}
