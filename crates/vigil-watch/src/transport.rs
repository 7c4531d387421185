//! The boundary to the change-notification transport.
//!
//! The engine never talks to an OS notification API or daemon itself; it
//! drives a [`Transport`] implementation through connect / resolve /
//! subscribe / unsubscribe / disconnect and consumes the typed notification
//! batches the transport delivers. One transport instance is exclusively
//! owned by one aggregator for its lifetime and must support repeated
//! connect/disconnect cycles, since a closed aggregator can be re-watched.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Resume point for the notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Since {
    /// Transport-issued clock token; resumption is exact.
    Cursor(String),
    /// Point in time, milliseconds since the epoch; the transport reports
    /// everything changed since that instant.
    Timestamp(u64),
}

impl Since {
    /// Wire form: a clock token goes through verbatim, a millisecond
    /// timestamp is floored to whole seconds.
    pub fn wire(&self) -> Value {
        match self {
            Self::Cursor(clock) => Value::from(clock.clone()),
            Self::Timestamp(ms) => Value::from(ms / 1000),
        }
    }
}

/// Capabilities reported by the transport at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// Names of the commands and features the transport supports.
    pub capabilities: Vec<String>,
}

impl TransportCapabilities {
    /// Build a capability set from anything yielding names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `name` is among the reported capabilities.
    pub fn supports(&self, name: &str) -> bool {
        self.capabilities.iter().any(|capability| capability == name)
    }
}

/// Outcome of resolving the project root against the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedRoot {
    /// The root the transport actually watches.
    pub watch_root: PathBuf,
    /// Prefix of the project root relative to `watch_root`, if any.
    pub relative_root: Option<PathBuf>,
    /// Human-readable warning from the transport, surfaced in the log.
    pub warning: Option<String>,
}

/// A subscription to changes under a watched root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Session-unique subscription name; inbound batches echo it back.
    pub name: String,
    /// Watched root returned by [`Transport::resolve_root`].
    pub root: PathBuf,
    /// Query expression selecting the paths of interest.
    pub expression: Value,
    /// Fields each file notification must carry.
    pub fields: Vec<String>,
    /// Wire form of the resume point, see [`Since::wire`].
    pub since: Value,
    /// Relative root to scope the subscription to, if one was resolved.
    pub relative_root: Option<PathBuf>,
}

/// One inbound notification delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Name of the subscription this batch belongs to.
    pub subscription: String,
    /// Clock token as of this delivery; becomes the new resume cursor.
    pub clock: String,
    /// Per-file notifications, named relative to the watched root.
    pub files: Vec<FileNotification>,
}

/// A single file entry within a notification batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNotification {
    /// Path relative to the watched root.
    pub name: String,
    /// Modification time in milliseconds; absent for removed files.
    #[serde(default)]
    pub mtime_ms: Option<u64>,
    /// Whether the file exists; `false` marks a removal.
    pub exists: bool,
    /// Whether the transport first saw this file in this delivery.
    #[serde(rename = "new", default)]
    pub created: bool,
}

/// A change-notification source.
///
/// Implementations own the connection to whatever produces change events
/// (a Watchman daemon, a scripted test double). All methods are driven from
/// one task at a time. `disconnect` must be tolerated when no connection is
/// open, and a disconnected transport must accept a later `connect`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and report its capabilities.
    async fn connect(&mut self) -> Result<TransportCapabilities>;

    /// Resolve the project root to the transport's watched root.
    async fn resolve_root(&mut self, root: &Path) -> Result<WatchedRoot>;

    /// Establish a subscription. Batches arrive on the returned channel
    /// until `unsubscribe` or `disconnect` drops the sending side.
    async fn subscribe(
        &mut self,
        request: SubscriptionRequest,
    ) -> Result<mpsc::UnboundedReceiver<NotificationBatch>>;

    /// Tear down one subscription by name.
    async fn unsubscribe(&mut self, name: &str) -> Result<()>;

    /// Release the connection.
    async fn disconnect(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_passes_through_verbatim() {
        let since = Since::Cursor("c:12345:67".to_string());
        assert_eq!(since.wire(), json!("c:12345:67"));
    }

    #[test]
    fn timestamp_floors_to_whole_seconds() {
        assert_eq!(Since::Timestamp(1999).wire(), json!(1));
        assert_eq!(Since::Timestamp(2000).wire(), json!(2));
        assert_eq!(Since::Timestamp(0).wire(), json!(0));
    }

    #[test]
    fn capability_lookup_is_exact() {
        let capabilities = TransportCapabilities::new(["cmd-watch-project", "relative_root"]);
        assert!(capabilities.supports("relative_root"));
        assert!(!capabilities.supports("cmd-clock"));
    }

    #[test]
    fn file_notification_parses_the_wire_shape() {
        let parsed: FileNotification = serde_json::from_value(json!({
            "name": "src/lib.rs",
            "mtime_ms": 1_234_567u64,
            "exists": true,
            "new": true,
        }))
        .unwrap();
        assert_eq!(parsed.name, "src/lib.rs");
        assert_eq!(parsed.mtime_ms, Some(1_234_567));
        assert!(parsed.exists);
        assert!(parsed.created);
    }

    #[test]
    fn removal_notification_may_omit_mtime_and_new() {
        let parsed: FileNotification = serde_json::from_value(json!({
            "name": "gone.md",
            "exists": false,
        }))
        .unwrap();
        assert_eq!(parsed.mtime_ms, None);
        assert!(!parsed.exists);
        assert!(!parsed.created);
    }
}
