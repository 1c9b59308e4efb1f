//! Flat statistics report filled in as a side effect of the pipeline stages.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// A single report value. Serializes as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(v) => Some(*v as f64),
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{v}"),
            MetricValue::Number(v) => write!(f, "{v}"),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Integer(v as i64)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Integer(v as i64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Accumulates named metrics. `record` takes `&self` so criterion stages
/// running in parallel can share one collector.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    values: Mutex<BTreeMap<String, MetricValue>>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any earlier value.
    /// A non-finite number is not representable in the report and clears the key.
    pub fn record(&self, key: impl Into<String>, value: impl Into<MetricValue>) {
        let (key, value): (String, MetricValue) = (key.into(), value.into());
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if let MetricValue::Number(v) = value {
            if !v.is_finite() {
                values.remove(&key);
                return;
            }
        }
        values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<MetricValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Snapshot of everything recorded so far.
    pub fn finalize(&self) -> StatisticsReport {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner).clone();
        StatisticsReport { values }
    }
}

/// Immutable key → scalar mapping, written as one flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsReport {
    values: BTreeMap<String, MetricValue>,
}

impl StatisticsReport {
    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.values.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetricValue::as_f64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetricValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn last_write_wins() {
        let stats = StatisticsCollector::new();
        stats.record("remaining_area_ha", 10.0);
        stats.record("remaining_area_ha", 12.5);
        assert_abs_diff_eq!(stats.finalize().number("remaining_area_ha").unwrap(), 12.5);
    }

    #[test]
    fn nan_is_not_recorded() {
        let stats = StatisticsCollector::new();
        stats.record("slope_mean_pct", f64::NAN);
        assert!(!stats.finalize().contains("slope_mean_pct"));
    }

    #[test]
    fn nan_clears_an_earlier_value() {
        let stats = StatisticsCollector::new();
        stats.record("hand_mean_m", 1.0);
        stats.record("hand_mean_m", f64::NAN);
        assert!(!stats.finalize().contains("hand_mean_m"));
    }

    #[test]
    fn report_serializes_flat() {
        let stats = StatisticsCollector::new();
        stats.record("status", "success");
        stats.record("hand_low_pixels", 42usize);
        stats.record("aoi_area_ha", 150.25);
        let json = serde_json::to_value(stats.finalize()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "aoi_area_ha": 150.25,
                "hand_low_pixels": 42,
                "status": "success",
            })
        );

        let back: StatisticsReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("hand_low_pixels"), Some(&MetricValue::Integer(42)));
    }

    #[test]
    fn snapshot_is_independent_of_later_records() {
        let stats = StatisticsCollector::new();
        stats.record("a", 1);
        let report = stats.finalize();
        stats.record("b", 2);
        assert_eq!(report.len(), 1);
        assert_eq!(stats.finalize().len(), 2);
    }

    #[test]
    fn concurrent_records_are_serialized() {
        let stats = StatisticsCollector::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let stats = &stats;
                s.spawn(move || {
                    for i in 0..50 {
                        stats.record(format!("t{t}_{i}"), i);
                    }
                });
            }
        });
        assert_eq!(stats.finalize().len(), 200);
    }
}
