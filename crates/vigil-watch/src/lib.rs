//! # Vigil File-Change Aggregation
//!
//! Tracks which files under a project root have changed since a given
//! point in time and reports them as debounced, deduplicated batches
//! rather than a flood of individual events. Vigil sits between a
//! Watchman-style notification transport and a consumer (typically a build
//! pipeline) that wants a settled, sorted picture of "what changed" once
//! activity quiesces.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────────┐    ┌──────────────────┐
//! │  Transport   │───▶│ Subscription Adapter │───▶│ ChangeAggregator │
//! │ (Watchman-   │    │ (negotiate, filter,  │    │ (baseline scan,  │
//! │  style)      │    │  translate)          │    │  debounce, emit) │
//! └──────────────┘    └──────────────────────┘    └──────────────────┘
//!                                                          │
//!                                                          ▼
//!                                  ┌───────────────────────────────────┐
//!                                  │ WatcherEvent broadcast stream     │
//!                                  │ (Changed / Removed / Aggregated)  │
//!                                  └───────────────────────────────────┘
//! ```
//!
//! The [`ChangeAggregator`] seeds a baseline of known modification times,
//! queues notifications that race the scan, and emits one
//! [`AggregatedBatch`] after each quiet debounce window. The
//! [`bridge::WatchBridge`] layers the build-host output contract on top:
//! partitioned path buckets, cache purging, and last-watch-wins
//! supersession.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod aggregator;
pub mod bridge;
pub mod config;
pub mod error;
mod events;
mod resolution;
mod scan;
mod subscription;
pub mod transport;

pub use aggregator::{ChangeAggregator, SessionState};
pub use bridge::{PathBuckets, ReadCache, WatchBridge, WatchReport};
pub use config::WatchConfiguration;
pub use error::{Error, Result};
pub use events::{AggregatedBatch, PathEvent, WatcherEvent};
pub use resolution::ResolutionEstimator;
pub use transport::{
    FileNotification, NotificationBatch, Since, SubscriptionRequest, Transport,
    TransportCapabilities, WatchedRoot,
};
