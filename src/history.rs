//! Bounded history of recent builds.
//!
//! Records live in a fixed-capacity ring, newest at the front. Each record is
//! identified by a monotonically increasing build id, which doubles as the
//! handle used to mark the build finished. Finishing a build whose record has
//! already been evicted is a no-op.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

const TABLE_HEADER: [&str; 4] = ["Repo URL", "Duration", "Status", "Error Message"];
const TABLE_MIN_WIDTH: usize = 20;
const TABLE_PADDING: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    InProgress,
    Success,
    Error,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::InProgress => "in progress",
            BuildStatus::Success => "success",
            BuildStatus::Error => "error",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub id: u64,
    pub repository: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: BuildStatus,
    /// Empty unless `status` is `Error`.
    pub error: String,
}

impl BuildRecord {
    /// Elapsed build time as of `now`; fixed once the build has finished.
    pub fn duration_at(&self, now: DateTime<Utc>) -> TimeDelta {
        self.finished_at.unwrap_or(now) - self.started_at
    }
}

/// Stable reference to a record in a `BuildHistory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildHandle(u64);

impl BuildHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct Ring {
    records: VecDeque<BuildRecord>,
    next_id: u64,
}

pub struct BuildHistory {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl BuildHistory {
    /// Creates a history retaining at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Starts an in-progress record, evicting the oldest one if full.
    pub fn record(&self, repository: &str) -> BuildHandle {
        let mut ring = self.lock_ring();
        let id = ring.next_id;
        ring.next_id += 1;

        if ring.records.len() == self.capacity {
            ring.records.pop_back();
        }
        ring.records.push_front(BuildRecord {
            id,
            repository: repository.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: BuildStatus::InProgress,
            error: String::new(),
        });
        BuildHandle(id)
    }

    /// Marks a build finished: successful when `error` is `None`.
    pub fn finish(&self, handle: BuildHandle, error: Option<String>) {
        let mut ring = self.lock_ring();
        let Some(record) = ring.records.iter_mut().find(|r| r.id == handle.0) else {
            tracing::debug!(build_id = handle.0, "finished build already evicted from history");
            return;
        };

        record.finished_at = Some(Utc::now());
        match error {
            Some(message) => {
                record.status = BuildStatus::Error;
                record.error = message;
            }
            None => {
                record.status = BuildStatus::Success;
                record.error.clear();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, handle: BuildHandle) -> Option<BuildRecord> {
        self.lock_ring()
            .records
            .iter()
            .find(|r| r.id == handle.0)
            .cloned()
    }

    /// Snapshot of retained records, most recently started first.
    pub fn list(&self) -> Vec<BuildRecord> {
        self.lock_ring().records.iter().cloned().collect()
    }

    fn lock_ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Renders a short human-readable duration such as `850ms`, `12.3s`, `4m 05s`.
pub fn format_duration(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds().max(0);
    let secs = millis / 1000;
    match secs {
        0 => format!("{}ms", millis),
        1..60 => format!("{:.1}s", millis as f64 / 1000.0),
        60..3600 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Renders records as a space-aligned table, header first.
///
/// Every column but the last is padded to the widest cell plus four spaces,
/// and to at least twenty characters.
pub fn render_table(records: &[BuildRecord], now: DateTime<Utc>) -> String {
    let rows: Vec<[String; 4]> = std::iter::once(TABLE_HEADER.map(str::to_string))
        .chain(records.iter().map(|r| {
            [
                r.repository.clone(),
                format_duration(r.duration_at(now)),
                r.status.to_string(),
                r.error.clone(),
            ]
        }))
        .collect();

    let mut widths = [0usize; 3];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count() + TABLE_PADDING);
        }
    }
    for width in &mut widths {
        *width = (*width).max(TABLE_MIN_WIDTH);
    }

    let mut out = String::new();
    for row in &rows {
        for (cell, width) in row.iter().zip(widths.iter()) {
            out.push_str(cell);
            out.extend(std::iter::repeat_n(' ', width - cell.chars().count()));
        }
        out.push_str(&row[3]);
        out.push('\n');
    }
    out
}
