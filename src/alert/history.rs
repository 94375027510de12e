use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

/// Entries kept in the per-frame detection log.
pub const DETECTION_LOG_CAPACITY: usize = 512;

/// What happened when the alert was handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// No notifier configured.
    NotRequested,
    Delivered,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// One raised alert. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub timestamp: SystemTime,
    pub subject: String,
    pub body: String,
    pub detection_summary: String,
    pub target: String,
    pub frame_sequence: u64,
    pub frame_path: Option<PathBuf>,
    pub delivery: DeliveryOutcome,
}

/// Time-ordered alert records, oldest evicted beyond `limit`.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    records: VecDeque<AlertRecord>,
    /// Zero keeps everything.
    limit: usize,
    evicted: u64,
}

impl AlertHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            limit,
            evicted: 0,
        }
    }

    /// Append `record`, returning it as stored.
    ///
    /// A timestamp earlier than the newest record (wall clock stepped back) is
    /// raised to that record's timestamp so the history stays ordered.
    pub fn push(&mut self, mut record: AlertRecord) -> &AlertRecord {
        if let Some(last) = self.records.back() {
            if record.timestamp < last.timestamp {
                log::warn!("AlertHistory: wall clock went backwards; clamping alert timestamp");
                record.timestamp = last.timestamp;
            }
        }
        if self.limit > 0 && self.records.len() == self.limit {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records.push_back(record);
        &self.records[self.records.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&AlertRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Records dropped to honor the limit.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// One processed frame that carried target detections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionLogEntry {
    pub timestamp: SystemTime,
    pub frame_sequence: u64,
    pub detection_count: usize,
    pub classes: Vec<String>,
    pub alerted: bool,
}

#[derive(Debug, Clone)]
pub struct DetectionLog {
    entries: VecDeque<DetectionLogEntry>,
    capacity: usize,
    total: u64,
}

impl Default for DetectionLog {
    fn default() -> Self {
        Self::with_capacity(DETECTION_LOG_CAPACITY)
    }
}

impl DetectionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, entry: DetectionLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total += 1;
    }

    pub fn entries(&self) -> Vec<DetectionLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ever recorded, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}
