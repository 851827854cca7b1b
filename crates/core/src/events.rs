use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::diff::ChangeRecord;
use crate::errors::ConfigError;

/// Notification emitted by the configuration manager
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// A reload committed a new configuration
    Loaded {
        files: Vec<PathBuf>,
        environment: Option<String>,
        at: DateTime<Utc>,
    },
    /// Field level changes, never empty
    Changed(Vec<ChangeRecord>),
    /// A reload or mutation failed; state was left untouched
    Error {
        operation: String,
        error: ConfigError,
        at: DateTime<Utc>,
    },
    SnapshotCreated { id: String },
    RolledBack { id: String, changes: usize },
    Saved { path: PathBuf, format: String },
}

impl ConfigEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigEvent::Loaded { .. } => "loaded",
            ConfigEvent::Changed(_) => "changed",
            ConfigEvent::Error { .. } => "error",
            ConfigEvent::SnapshotCreated { .. } => "snapshot_created",
            ConfigEvent::RolledBack { .. } => "rolled_back",
            ConfigEvent::Saved { .. } => "saved",
        }
    }
}

/// Serializable projection used by the binary's JSON event log
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub detail: String,
}

impl From<&ConfigEvent> for EventSummary {
    fn from(event: &ConfigEvent) -> Self {
        let detail = match event {
            ConfigEvent::Loaded { files, .. } => format!("{} file(s)", files.len()),
            ConfigEvent::Changed(changes) => format!("{} change(s)", changes.len()),
            ConfigEvent::Error { operation, error, .. } => format!("{operation}: {error}"),
            ConfigEvent::SnapshotCreated { id } => id.clone(),
            ConfigEvent::RolledBack { id, changes } => format!("{id} ({changes} change(s))"),
            ConfigEvent::Saved { path, format } => format!("{} as {format}", path.display()),
        };
        Self {
            event: event.name(),
            detail,
        }
    }
}

/// Typed publish/subscribe over a broadcast channel.
///
/// Publishing with no subscribers is not an error; slow subscribers observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that received the event
    pub fn publish(&self, event: E) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("no event subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let bus: EventBus<ConfigEvent> = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.publish(ConfigEvent::SnapshotCreated { id: "s1".into() });
        assert_eq!(delivered, 2);

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                ConfigEvent::SnapshotCreated { id } => assert_eq!(id, "s1"),
                other => panic!("unexpected event {}", other.name()),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::new(4);
        assert_eq!(bus.publish(1), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_summary_detail() {
        let summary = EventSummary::from(&ConfigEvent::Saved {
            path: PathBuf::from("/tmp/out.yaml"),
            format: "yaml".into(),
        });
        assert_eq!(summary.event, "saved");
        assert_eq!(summary.detail, "/tmp/out.yaml as yaml");
    }
}
