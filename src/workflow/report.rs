use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::serial::Uid;

/// Receives per-sensor results as the session progresses.
pub trait ReportSink {
    fn add_sensor_data(&mut self, uid: Uid, key: &str, value: Value);
    fn finalize(&mut self, status: &str);
}

/// Convert a result into a report value.
pub fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Report kept in memory and serialized by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub session_id: Uuid,
    pub port: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub sensors: BTreeMap<Uid, BTreeMap<String, Value>>,
}

impl MemoryReport {
    pub fn new(port: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            port: port.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            sensors: BTreeMap::new(),
        }
    }

    pub fn sensor(&self, uid: Uid) -> Option<&BTreeMap<String, Value>> {
        self.sensors.get(&uid)
    }

    pub fn get(&self, uid: Uid, key: &str) -> Option<&Value> {
        self.sensors.get(&uid).and_then(|data| data.get(key))
    }
}

impl ReportSink for MemoryReport {
    fn add_sensor_data(&mut self, uid: Uid, key: &str, value: Value) {
        log::debug!("Report {}: {} = {}", uid, key, value);
        self.sensors
            .entry(uid)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn finalize(&mut self, status: &str) {
        self.finished_at = Some(Utc::now());
        self.status = Some(status.to_string());
        log::info!("Session {} finished: {}", self.session_id, status);
    }
}
