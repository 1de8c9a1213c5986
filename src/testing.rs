//! In-memory collaborators for testing code built on this crate.
//!
//! The fakes here stand in for remote control planes so that lifecycle code
//! can be exercised without network access. Combine them with
//! `#[tokio::test(start_paused = true)]` to make waits run instantly.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_convergence::testing::ScriptedFetcher;
//! use hemmer_provider_convergence::waiter::{wait, ResourceHandle, WaitSpec};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_waits_for_active() {
//!     let fetcher = ScriptedFetcher::new().then_state("CREATING").then_state("ACTIVE");
//!     let handle = ResourceHandle::new("ws-1", fetcher);
//!     let state = wait(&handle, WaitSpec::new(Duration::from_secs(60)).accept(["ACTIVE"]))
//!         .await
//!         .unwrap();
//!     assert_eq!(handle.fetcher().calls(), 2);
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::amp::{status, AmpApi, AmpError, LoggingConfigurationMetadata, LoggingConfigurationStatus};
use crate::kinesisvideo::KinesisVideoApi;
use crate::tags::{TagMutator, TagSet};
use crate::waiter::{Fetcher, State};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Error type returned by the fakes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FakeError {
    /// The resource does not exist.
    #[error("ResourceNotFoundException: {0}")]
    NotFound(String),
    /// Any other failure.
    #[error("{0}")]
    Service(String),
}

impl FakeError {
    /// Returns true for [`FakeError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// =========================================================================
// Scripted Fetcher
// =========================================================================

/// A [`Fetcher`] that replays a fixed sequence of responses.
///
/// Once the script runs out, the repeated state is returned if one was set,
/// otherwise every fetch fails.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<State, FakeError>>>,
    repeat: Option<State>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observed state.
    pub fn then_state(self, state: impl Into<State>) -> Self {
        self.then(Ok(state.into()))
    }

    /// Append a not-found response.
    pub fn then_not_found(self) -> Self {
        self.then(Err(FakeError::NotFound("resource".to_string())))
    }

    /// Append an error response.
    pub fn then_error(self, err: FakeError) -> Self {
        self.then(Err(err))
    }

    /// Return `state` forever once the script is exhausted.
    pub fn repeat_state(mut self, state: impl Into<State>) -> Self {
        self.repeat = Some(state.into());
        self
    }

    /// Number of fetches made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn then(self, response: Result<State, FakeError>) -> Self {
        lock(&self.script).push_back(response);
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    type Error = FakeError;

    async fn fetch(&self, _identifier: &str) -> Result<State, FakeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = lock(&self.script).pop_front() {
            return response;
        }
        match &self.repeat {
            Some(state) => Ok(state.clone()),
            None => Err(FakeError::Service("fetch script exhausted".to_string())),
        }
    }

    fn is_not_found(&self, err: &FakeError) -> bool {
        err.is_not_found()
    }
}

// =========================================================================
// Tag Service
// =========================================================================

/// A remote call recorded by [`InMemoryTagService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCall {
    /// A tag listing.
    List {
        /// Resource identifier.
        identifier: String,
    },
    /// A batched removal.
    Remove {
        /// Resource identifier.
        identifier: String,
        /// Keys removed.
        keys: Vec<String>,
    },
    /// A batched upsert.
    Upsert {
        /// Resource identifier.
        identifier: String,
        /// Tags written.
        tags: TagSet,
    },
}

/// An in-memory tagging API that records every call.
///
/// Implements both [`TagMutator`] and [`KinesisVideoApi`].
#[derive(Debug, Default)]
pub struct InMemoryTagService {
    resources: Mutex<HashMap<String, TagSet>>,
    calls: Mutex<Vec<TagCall>>,
    remove_failure: Mutex<Option<String>>,
    upsert_failure: Mutex<Option<String>>,
}

impl InMemoryTagService {
    /// Create a service with no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service holding one resource with `tags`.
    pub fn with_tags(identifier: impl Into<String>, tags: TagSet) -> Self {
        let service = Self::new();
        lock(&service.resources).insert(identifier.into(), tags);
        service
    }

    /// Current tags of a resource (empty if unknown).
    pub fn tags(&self, identifier: &str) -> TagSet {
        lock(&self.resources)
            .get(identifier)
            .cloned()
            .unwrap_or_default()
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<TagCall> {
        lock(&self.calls).clone()
    }

    /// Make every removal fail with `message`.
    pub fn fail_removals(&self, message: impl Into<String>) {
        *lock(&self.remove_failure) = Some(message.into());
    }

    /// Make every upsert fail with `message`.
    pub fn fail_upserts(&self, message: impl Into<String>) {
        *lock(&self.upsert_failure) = Some(message.into());
    }

    fn record(&self, call: TagCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait::async_trait]
impl TagMutator for InMemoryTagService {
    type Error = FakeError;

    async fn remove_tags(&self, identifier: &str, keys: &[String]) -> Result<(), FakeError> {
        self.record(TagCall::Remove {
            identifier: identifier.to_string(),
            keys: keys.to_vec(),
        });
        if let Some(message) = lock(&self.remove_failure).clone() {
            return Err(FakeError::Service(message));
        }

        let mut resources = lock(&self.resources);
        let current = resources.entry(identifier.to_string()).or_default();
        *current = current
            .iter()
            .filter(|(k, _)| !keys.iter().any(|key| key.as_str() == *k))
            .collect();
        Ok(())
    }

    async fn upsert_tags(&self, identifier: &str, tags: &TagSet) -> Result<(), FakeError> {
        self.record(TagCall::Upsert {
            identifier: identifier.to_string(),
            tags: tags.clone(),
        });
        if let Some(message) = lock(&self.upsert_failure).clone() {
            return Err(FakeError::Service(message));
        }

        let mut resources = lock(&self.resources);
        let current = resources.entry(identifier.to_string()).or_default();
        for (key, value) in tags.iter() {
            current.insert(key, value);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KinesisVideoApi for InMemoryTagService {
    type Error = FakeError;

    async fn list_tags_for_stream(&self, stream_arn: &str) -> Result<TagSet, FakeError> {
        self.record(TagCall::List {
            identifier: stream_arn.to_string(),
        });
        lock(&self.resources)
            .get(stream_arn)
            .cloned()
            .ok_or_else(|| FakeError::NotFound(stream_arn.to_string()))
    }

    async fn untag_stream(&self, stream_arn: &str, tag_keys: &[String]) -> Result<(), FakeError> {
        self.remove_tags(stream_arn, tag_keys).await
    }

    async fn tag_stream(&self, stream_arn: &str, tags: &TagSet) -> Result<(), FakeError> {
        self.upsert_tags(stream_arn, tags).await
    }
}

// =========================================================================
// AMP Service
// =========================================================================

#[derive(Debug)]
struct LoggingConfigurationEntry {
    log_group_arn: String,
    // The front entry is the current status; it advances on each describe
    // until one entry is left.
    statuses: VecDeque<String>,
    deletes_remaining: Option<u32>,
}

impl LoggingConfigurationEntry {
    fn current(&self) -> String {
        self.statuses
            .front()
            .cloned()
            .unwrap_or_else(|| status::ACTIVE.to_string())
    }
}

#[derive(Debug, Default)]
struct AmpInner {
    configurations: HashMap<String, LoggingConfigurationEntry>,
    pending_script: Option<VecDeque<String>>,
    delete_polls: u32,
    next_failure: Option<AmpError>,
    failure_reason: Option<String>,
    calls: HashMap<&'static str, usize>,
}

impl AmpInner {
    fn begin(&mut self, op: &'static str) -> Result<(), AmpError> {
        *self.calls.entry(op).or_default() += 1;
        match self.next_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn script(&mut self) -> VecDeque<String> {
        self.pending_script
            .take()
            .unwrap_or_else(|| VecDeque::from([status::ACTIVE.to_string()]))
    }
}

/// An in-memory AMP control plane.
///
/// Status progression is scripted: each describe reports the next scripted
/// status until the last one, which then sticks. Without a script, creates
/// and updates become `ACTIVE` immediately.
#[derive(Debug, Default)]
pub struct InMemoryAmpService {
    inner: Mutex<AmpInner>,
}

impl InMemoryAmpService {
    /// Create a service with no logging configurations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an `ACTIVE` logging configuration.
    pub fn with_configuration(self, workspace_id: &str, log_group_arn: &str) -> Self {
        lock(&self.inner).configurations.insert(
            workspace_id.to_string(),
            LoggingConfigurationEntry {
                log_group_arn: log_group_arn.to_string(),
                statuses: VecDeque::from([status::ACTIVE.to_string()]),
                deletes_remaining: None,
            },
        );
        self
    }

    /// Status script for the next create or update.
    pub fn with_status_script<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.inner).pending_script = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    /// Reason reported with `CREATION_FAILED` and `UPDATE_FAILED` statuses.
    pub fn with_failure_reason(self, reason: impl Into<String>) -> Self {
        lock(&self.inner).failure_reason = Some(reason.into());
        self
    }

    /// Number of describes reporting `DELETING` before a deleted configuration vanishes.
    pub fn with_delete_polls(self, polls: u32) -> Self {
        lock(&self.inner).delete_polls = polls;
        self
    }

    /// Replace the status script of an existing configuration.
    pub fn set_status_script<I, S>(&self, workspace_id: &str, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(entry) = lock(&self.inner).configurations.get_mut(workspace_id) {
            entry.statuses = statuses.into_iter().map(Into::into).collect();
        }
    }

    /// Make the next call of any kind fail with `err`.
    pub fn fail_next_call(&self, err: AmpError) {
        lock(&self.inner).next_failure = Some(err);
    }

    /// Current status of a configuration without advancing its script.
    pub fn status(&self, workspace_id: &str) -> Option<String> {
        lock(&self.inner)
            .configurations
            .get(workspace_id)
            .map(LoggingConfigurationEntry::current)
    }

    /// Number of calls made to `op`: `create`, `update`, `describe` or `delete`.
    pub fn calls(&self, op: &str) -> usize {
        lock(&self.inner).calls.get(op).copied().unwrap_or(0)
    }
}

/// Rejects ARNs that do not name a CloudWatch Logs log group.
fn check_log_group(log_group_arn: &str) -> Result<(), AmpError> {
    if log_group_arn.starts_with("arn:") && log_group_arn.contains(":log-group:") {
        return Ok(());
    }
    Err(AmpError::Validation(format!(
        "{} is not a log group ARN",
        log_group_arn
    )))
}

fn not_found(workspace_id: &str) -> AmpError {
    AmpError::ResourceNotFound(format!("logging configuration for workspace {}", workspace_id))
}

#[async_trait::async_trait]
impl AmpApi for InMemoryAmpService {
    async fn create_logging_configuration(
        &self,
        workspace_id: &str,
        log_group_arn: &str,
    ) -> Result<LoggingConfigurationStatus, AmpError> {
        let mut inner = lock(&self.inner);
        inner.begin("create")?;
        check_log_group(log_group_arn)?;
        if inner.configurations.contains_key(workspace_id) {
            return Err(AmpError::Conflict(format!(
                "workspace {} already has a logging configuration",
                workspace_id
            )));
        }

        let statuses = inner.script();
        let entry = LoggingConfigurationEntry {
            log_group_arn: log_group_arn.to_string(),
            statuses,
            deletes_remaining: None,
        };
        let current = entry.current();
        inner.configurations.insert(workspace_id.to_string(), entry);
        Ok(LoggingConfigurationStatus::new(current))
    }

    async fn update_logging_configuration(
        &self,
        workspace_id: &str,
        log_group_arn: &str,
    ) -> Result<LoggingConfigurationStatus, AmpError> {
        let mut inner = lock(&self.inner);
        inner.begin("update")?;
        check_log_group(log_group_arn)?;
        let pending = inner.pending_script.take();
        let entry = inner
            .configurations
            .get_mut(workspace_id)
            .ok_or_else(|| not_found(workspace_id))?;

        entry.log_group_arn = log_group_arn.to_string();
        if let Some(statuses) = pending {
            entry.statuses = statuses;
        }
        Ok(LoggingConfigurationStatus::new(entry.current()))
    }

    async fn describe_logging_configuration(
        &self,
        workspace_id: &str,
    ) -> Result<LoggingConfigurationMetadata, AmpError> {
        let mut inner = lock(&self.inner);
        inner.begin("describe")?;
        let entry = inner
            .configurations
            .get_mut(workspace_id)
            .ok_or_else(|| not_found(workspace_id))?;

        if let Some(remaining) = entry.deletes_remaining {
            if remaining == 0 {
                inner.configurations.remove(workspace_id);
                return Err(not_found(workspace_id));
            }
            entry.deletes_remaining = Some(remaining - 1);
        }

        let current = entry.current();
        if entry.statuses.len() > 1 {
            entry.statuses.pop_front();
        }
        let log_group_arn = entry.log_group_arn.clone();

        let mut reported = LoggingConfigurationStatus::new(current);
        if reported.status_code == status::CREATION_FAILED
            || reported.status_code == status::UPDATE_FAILED
        {
            reported.status_reason = inner.failure_reason.clone();
        }
        Ok(LoggingConfigurationMetadata {
            workspace: workspace_id.to_string(),
            log_group_arn,
            status: reported,
        })
    }

    async fn delete_logging_configuration(&self, workspace_id: &str) -> Result<(), AmpError> {
        let mut inner = lock(&self.inner);
        inner.begin("delete")?;
        let polls = inner.delete_polls;
        if polls == 0 {
            return inner
                .configurations
                .remove(workspace_id)
                .map(|_| ())
                .ok_or_else(|| not_found(workspace_id));
        }

        let entry = inner
            .configurations
            .get_mut(workspace_id)
            .ok_or_else(|| not_found(workspace_id))?;
        entry.statuses = VecDeque::from([status::DELETING.to_string()]);
        entry.deletes_remaining = Some(polls);
        Ok(())
    }
}
