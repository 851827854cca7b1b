//! Bounded snapshot history used for rollback.

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::diff::{ChangeDetector, ChangeRecord};
use crate::errors::{ConfigError, ConfigResult};

pub const DEFAULT_MAX_SNAPSHOTS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotComparison {
    pub left: Option<Snapshot>,
    pub right: Option<Snapshot>,
    pub identical: bool,
    /// Empty when either side is missing
    pub changes: Vec<ChangeRecord>,
}

/// On-disk form: camelCase keys, `createdAt` as RFC 3339 or epoch millis.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedSnapshot {
    id: String,
    created_at: ExportedTimestamp,
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ExportedTimestamp {
    Millis(i64),
    Text(String),
}

impl ExportedTimestamp {
    fn into_datetime(self, id: &str) -> ConfigResult<DateTime<Utc>> {
        match self {
            ExportedTimestamp::Millis(ms) => Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
                ConfigError::validation(
                    format!("snapshots[{id}].createdAt"),
                    format!("时间戳超出范围: {ms}"),
                )
            }),
            ExportedTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|e| {
                    ConfigError::validation(
                        format!("snapshots[{id}].createdAt"),
                        format!("无法解析时间戳 {text}: {e}"),
                    )
                }),
        }
    }
}

/// Ordered history of configuration states, oldest first.
///
/// Eviction is by creation order. Re-using an id updates that snapshot in
/// place and keeps its slot.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    snapshots: IndexMap<String, Snapshot>,
    max_snapshots: usize,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SNAPSHOTS)
    }
}

impl SnapshotManager {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: IndexMap::new(),
            max_snapshots: max_snapshots.max(1),
        }
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    pub fn create(
        &mut self,
        id: impl Into<String>,
        config: &Value,
        description: Option<String>,
    ) -> Snapshot {
        let id = id.into();
        let created_at = self
            .snapshots
            .get(&id)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);

        let snapshot = Snapshot {
            id: id.clone(),
            created_at,
            config: config.clone(),
            description,
        };
        // IndexMap::insert keeps the original slot for an existing key
        self.snapshots.insert(id.clone(), snapshot.clone());
        self.enforce_capacity();

        debug!(snapshot_id = %id, count = self.snapshots.len(), "创建配置快照");
        snapshot
    }

    fn enforce_capacity(&mut self) {
        while self.snapshots.len() > self.max_snapshots {
            if let Some((evicted, _)) = self.snapshots.shift_remove_index(0) {
                debug!(snapshot_id = %evicted, "快照数量超过上限，淘汰最早的快照");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.snapshots.contains_key(id)
    }

    pub fn delete(&mut self, id: &str) -> bool {
        self.snapshots.shift_remove(id).is_some()
    }

    /// Ids in creation order
    pub fn list(&self) -> Vec<String> {
        self.snapshots.keys().cloned().collect()
    }

    pub fn get_all(&self) -> Vec<Snapshot> {
        self.snapshots.values().cloned().collect()
    }

    pub fn get_latest(&self) -> Option<&Snapshot> {
        self.snapshots.last().map(|(_, snapshot)| snapshot)
    }

    /// Snapshots with `start <= created_at <= end`
    pub fn get_by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Snapshot> {
        self.snapshots
            .values()
            .filter(|s| s.created_at >= start && s.created_at <= end)
            .cloned()
            .collect()
    }

    pub fn compare(&self, left_id: &str, right_id: &str) -> SnapshotComparison {
        let left = self.get(left_id).cloned();
        let right = self.get(right_id).cloned();

        let changes = match (&left, &right) {
            (Some(l), Some(r)) => ChangeDetector.detect_changes(
                &l.config,
                &r.config,
                &format!("snapshot:{left_id}..{right_id}"),
                None,
            ),
            _ => Vec::new(),
        };
        let identical = left.is_some() && right.is_some() && changes.is_empty();

        SnapshotComparison {
            left,
            right,
            identical,
            changes,
        }
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Serialises the full history as a JSON array in creation order.
    pub fn export(&self) -> ConfigResult<String> {
        let exported: Vec<ExportedSnapshot> = self
            .snapshots
            .values()
            .map(|s| ExportedSnapshot {
                id: s.id.clone(),
                created_at: ExportedTimestamp::Text(
                    s.created_at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
                ),
                config: s.config.clone(),
                description: s.description.clone(),
            })
            .collect();

        serde_json::to_string_pretty(&exported)
            .map_err(|e| ConfigError::configuration(format!("快照导出失败: {e}")))
    }

    /// Replaces the history with an exported document.
    ///
    /// The array order becomes the creation order. When the document holds more
    /// entries than the capacity, only the newest are kept. Returns the number
    /// of snapshots held afterwards.
    pub fn import(&mut self, document: &str) -> ConfigResult<usize> {
        let exported: Vec<ExportedSnapshot> = serde_json::from_str(document).map_err(|e| {
            ConfigError::validation("snapshots", format!("快照文档格式错误: {e}"))
        })?;

        let mut restored = IndexMap::with_capacity(exported.len());
        for entry in exported {
            let created_at = entry.created_at.into_datetime(&entry.id)?;
            restored.insert(
                entry.id.clone(),
                Snapshot {
                    id: entry.id,
                    created_at,
                    config: entry.config,
                    description: entry.description,
                },
            );
        }

        self.snapshots = restored;
        self.enforce_capacity();
        Ok(self.snapshots.len())
    }
}
