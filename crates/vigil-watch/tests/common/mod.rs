//! Shared test support: a scripted in-memory transport.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vigil_watch::{
    AggregatedBatch, Error, FileNotification, NotificationBatch, Result, SubscriptionRequest,
    Transport, TransportCapabilities, WatchedRoot, WatcherEvent,
};

/// Transport operations in invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    ResolveRoot,
    Subscribe,
    Unsubscribe,
    Disconnect,
}

#[derive(Default)]
struct ControlState {
    calls: Vec<TransportCall>,
    request: Option<SubscriptionRequest>,
    sender: Option<mpsc::UnboundedSender<NotificationBatch>>,
}

/// Test-side handle to drive and observe a [`ScriptedTransport`].
#[derive(Clone, Default)]
pub struct TransportControl {
    state: Arc<Mutex<ControlState>>,
}

impl TransportControl {
    fn record(&self, call: TransportCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, call: TransportCall) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn has_subscription(&self) -> bool {
        self.state.lock().unwrap().sender.is_some()
    }

    pub fn last_request(&self) -> SubscriptionRequest {
        self.state
            .lock()
            .unwrap()
            .request
            .clone()
            .expect("no subscription was requested")
    }

    /// Deliver a batch under the active subscription's name.
    pub fn deliver(&self, clock: &str, files: Vec<FileNotification>) {
        let name = self.last_request().name;
        self.deliver_as(&name, clock, files);
    }

    /// Deliver a batch under an arbitrary subscription name.
    pub fn deliver_as(&self, subscription: &str, clock: &str, files: Vec<FileNotification>) {
        let state = self.state.lock().unwrap();
        state
            .sender
            .as_ref()
            .expect("no active subscription")
            .send(NotificationBatch {
                subscription: subscription.to_string(),
                clock: clock.to_string(),
                files,
            })
            .expect("notification pump dropped its receiver");
    }
}

/// In-memory transport driven by the test.
pub struct ScriptedTransport {
    control: TransportControl,
    capabilities: Vec<String>,
    fail_connect: bool,
    fail_subscribe: bool,
}

impl ScriptedTransport {
    pub fn new() -> (Self, TransportControl) {
        let control = TransportControl::default();
        let transport = Self {
            control: control.clone(),
            capabilities: vec!["cmd-watch-project".to_string(), "relative_root".to_string()],
            fail_connect: false,
            fail_subscribe: false,
        };
        (transport, control)
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<TransportCapabilities> {
        self.control.record(TransportCall::Connect);
        if self.fail_connect {
            return Err(Error::Transport("scripted connect failure".to_string()));
        }
        Ok(TransportCapabilities::new(self.capabilities.clone()))
    }

    async fn resolve_root(&mut self, root: &Path) -> Result<WatchedRoot> {
        self.control.record(TransportCall::ResolveRoot);
        Ok(WatchedRoot {
            watch_root: root.to_path_buf(),
            relative_root: None,
            warning: None,
        })
    }

    async fn subscribe(
        &mut self,
        request: SubscriptionRequest,
    ) -> Result<mpsc::UnboundedReceiver<NotificationBatch>> {
        self.control.record(TransportCall::Subscribe);
        if self.fail_subscribe {
            return Err(Error::Transport("scripted subscribe failure".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.control.state.lock().unwrap();
        state.request = Some(request);
        state.sender = Some(sender);
        Ok(receiver)
    }

    async fn unsubscribe(&mut self, _name: &str) -> Result<()> {
        self.control.record(TransportCall::Unsubscribe);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.control.record(TransportCall::Disconnect);
        self.control.state.lock().unwrap().sender = None;
        Ok(())
    }
}

/// A change notification for an existing file.
pub fn updated(name: &str, mtime_ms: u64) -> FileNotification {
    FileNotification {
        name: name.to_string(),
        mtime_ms: Some(mtime_ms),
        exists: true,
        created: false,
    }
}

/// A removal notification.
pub fn removed(name: &str) -> FileNotification {
    FileNotification {
        name: name.to_string(),
        mtime_ms: None,
        exists: false,
        created: false,
    }
}

/// Receive events until the next aggregated batch.
pub async fn next_aggregated(
    events: &mut tokio::sync::broadcast::Receiver<WatcherEvent>,
) -> AggregatedBatch {
    loop {
        match events.recv().await {
            Ok(WatcherEvent::Aggregated(batch)) => return batch,
            Ok(_) => continue,
            Err(err) => panic!("event stream ended before a batch settled: {err}"),
        }
    }
}

/// Drain everything currently buffered on the receiver.
pub fn drain_events(
    events: &mut tokio::sync::broadcast::Receiver<WatcherEvent>,
) -> Vec<WatcherEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
