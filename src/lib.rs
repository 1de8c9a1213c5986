//! Hemmer Provider Convergence
//!
//! Building blocks for provider resources whose control plane is eventually
//! consistent and whose resources carry tags.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Tag reconciliation** ([`tags`]): compute the minimal remove/upsert delta
//!   between current and desired tags, skipping platform-reserved keys, and
//!   apply it with at most two remote calls
//! - **Waiters** ([`waiter`]): poll a resource with bounded backoff until it
//!   reaches an acceptable state, a failure state, times out or is cancelled
//! - **Resource adapters**: the Prometheus logging configuration lifecycle
//!   ([`amp`]) and Kinesis Video stream tagging ([`kinesisvideo`])
//! - **Error types**, **configuration** and **logging** helpers
//! - **Fakes** for tests ([`testing`])
//!
//! Remote APIs are traits passed in by the caller ([`waiter::Fetcher`],
//! [`tags::TagMutator`], [`amp::AmpApi`], [`kinesisvideo::KinesisVideoApi`]).
//! Each implementation decides which of its errors mean "not found".
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_convergence::waiter::{wait, ResourceHandle, WaitSpec};
//! use hemmer_provider_convergence::tags::{diff, apply, is_aws_reserved};
//!
//! // After a mutating call, confirm convergence.
//! let handle = ResourceHandle::new(&arn, StreamStatus::new(&client));
//! wait(&handle, WaitSpec::new(timeouts.update).accept(["ACTIVE"])).await?;
//!
//! // Bring the tags in line with configuration.
//! let delta = diff(&prior_tags, &planned_tags, is_aws_reserved);
//! apply(&client, &arn, &delta).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod amp;
pub mod config;
pub mod error;
pub mod kinesisvideo;
pub mod logging;
pub mod tags;
pub mod testing;
pub mod waiter;

// Re-export main types at crate root
pub use config::{ProviderConfig, Timeouts};
pub use error::{BoxError, ProviderError, TagOperationError, TagPhase, WaitError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use tags::{apply, diff, is_aws_reserved, reconcile, TagDelta, TagMutator, TagSet};
pub use waiter::{wait, wait_until, Backoff, Fetcher, ResourceHandle, State, WaitSpec};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
