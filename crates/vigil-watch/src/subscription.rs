//! Subscription adapter: owns the transport, negotiates capabilities, and
//! translates raw notifications into aggregator events.

use crate::error::{Error, Result};
use crate::events::PathEvent;
use crate::transport::{NotificationBatch, Since, SubscriptionRequest, Transport};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capabilities the transport must report before a subscription is attempted.
pub(crate) const REQUIRED_CAPABILITIES: [&str; 2] = ["cmd-watch-project", "relative_root"];

/// Fields requested for every notification the transport delivers.
const NOTIFICATION_FIELDS: [&str; 3] = ["name", "mtime_ms", "exists"];

/// Owns the transport for one aggregator and drives its wire protocol.
pub(crate) struct SubscriptionAdapter {
    transport: Box<dyn Transport>,
    root: PathBuf,
    subscription: Option<String>,
}

impl SubscriptionAdapter {
    pub(crate) fn new(transport: Box<dyn Transport>, root: PathBuf) -> Self {
        Self {
            transport,
            root,
            subscription: None,
        }
    }

    /// Connect, negotiate capabilities, resolve the watch root, and
    /// subscribe to changes for `paths` since `since`.
    ///
    /// The subscription name is unique per session so that inbound batches
    /// can be checked against cross-talk from a reused connection.
    pub(crate) async fn establish(
        &mut self,
        paths: &[PathBuf],
        since: &Since,
    ) -> Result<(BatchTranslator, mpsc::UnboundedReceiver<NotificationBatch>)> {
        let capabilities = self.transport.connect().await?;
        for required in REQUIRED_CAPABILITIES {
            if !capabilities.supports(required) {
                return Err(Error::Transport(format!(
                    "transport is missing the required capability '{required}'"
                )));
            }
        }
        debug!("transport capability check passed");

        let resolved = self.transport.resolve_root(&self.root).await?;
        if let Some(warning) = &resolved.warning {
            warn!(%warning, "transport warned while resolving the watch root");
        }

        let name = format!("vigil-{}", Uuid::new_v4());
        let names: Vec<String> = paths.iter().map(|path| self.relative_name(path)).collect();
        let request = SubscriptionRequest {
            name: name.clone(),
            root: resolved.watch_root,
            expression: json!(["allof", ["name", names, "wholename"]]),
            fields: NOTIFICATION_FIELDS.iter().map(|field| field.to_string()).collect(),
            since: since.wire(),
            relative_root: resolved.relative_root,
        };
        debug!(subscription = %name, paths = paths.len(), "subscribing");

        let batches = self.transport.subscribe(request).await?;
        self.subscription = Some(name.clone());
        Ok((
            BatchTranslator {
                subscription: name,
                root: self.root.clone(),
            },
            batches,
        ))
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Best-effort teardown: failures are logged and otherwise ignored,
    /// the connection is going away regardless.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(name) = self.subscription.take() {
            if let Err(err) = self.transport.unsubscribe(&name).await {
                warn!(%err, "unsubscribe failed during shutdown");
            }
        }
        if let Err(err) = self.transport.disconnect().await {
            warn!(%err, "transport disconnect failed");
        }
    }
}

/// Translates raw notification batches for one subscription into
/// aggregator-facing events.
#[derive(Debug, Clone)]
pub(crate) struct BatchTranslator {
    pub(crate) subscription: String,
    pub(crate) root: PathBuf,
}

impl BatchTranslator {
    /// Returns the batch's clock and translated events, or `None` for a
    /// batch belonging to a different subscription.
    pub(crate) fn translate(&self, batch: NotificationBatch) -> Option<(String, Vec<PathEvent>)> {
        if batch.subscription != self.subscription {
            debug!(
                theirs = %batch.subscription,
                ours = %self.subscription,
                "dropping notification batch for a foreign subscription"
            );
            return None;
        }

        let mut events = Vec::with_capacity(batch.files.len());
        for file in batch.files {
            let path = self.root.join(&file.name);
            if !file.exists {
                events.push(PathEvent::Removed { path });
            } else if let Some(mtime_ms) = file.mtime_ms {
                events.push(PathEvent::Updated { path, mtime_ms });
            } else {
                warn!(
                    path = %path.display(),
                    "notification for an existing file carried no modification time, skipping"
                );
            }
        }
        Some((batch.clock, events))
    }
}
