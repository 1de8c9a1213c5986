//! Prometheus (AMP) logging configuration resource.
//!
//! A workspace has at most one logging configuration, so the workspace id is
//! also the resource id. Every mutating call is followed by a wait until the
//! remote status settles.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Timeouts;
use crate::error::{ProviderError, WaitError};
use crate::waiter::{wait, Backoff, Fetcher, ResourceHandle, State, WaitSpec};

/// Resource type name used by the lifecycle layer.
pub const RESOURCE_TYPE: &str = "aws_prometheus_logging_configuration";

/// Not-found reads tolerated while a new configuration becomes visible.
pub const CREATE_NOT_FOUND_CHECKS: u32 = 20;

/// Logging configuration status codes.
pub mod status {
    /// The configuration is being created.
    pub const CREATING: &str = "CREATING";
    /// The configuration is ready.
    pub const ACTIVE: &str = "ACTIVE";
    /// The configuration is being updated.
    pub const UPDATING: &str = "UPDATING";
    /// The configuration is being deleted.
    pub const DELETING: &str = "DELETING";
    /// Creation failed.
    pub const CREATION_FAILED: &str = "CREATION_FAILED";
    /// Update failed.
    pub const UPDATE_FAILED: &str = "UPDATE_FAILED";
}

/// Errors returned by the AMP control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmpError {
    /// `ResourceNotFoundException`.
    #[error("ResourceNotFoundException: {0}")]
    ResourceNotFound(String),
    /// `ConflictException`.
    #[error("ConflictException: {0}")]
    Conflict(String),
    /// `ValidationException`.
    #[error("ValidationException: {0}")]
    Validation(String),
    /// Any other service or transport failure.
    #[error("{0}")]
    Service(String),
}

impl AmpError {
    /// Returns true for `ResourceNotFoundException`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }
}

/// Status of a logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfigurationStatus {
    /// One of the [`status`] codes.
    pub status_code: String,
    /// Reason for a failed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

impl LoggingConfigurationStatus {
    /// Create a status without a reason.
    pub fn new(status_code: impl Into<String>) -> Self {
        Self {
            status_code: status_code.into(),
            status_reason: None,
        }
    }
}

/// A logging configuration as described by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfigurationMetadata {
    /// Workspace id.
    pub workspace: String,
    /// ARN of the CloudWatch log group receiving the logs.
    pub log_group_arn: String,
    /// Current status.
    pub status: LoggingConfigurationStatus,
}

/// The AMP logging configuration API.
#[async_trait::async_trait]
pub trait AmpApi: Send + Sync {
    /// Create the logging configuration of a workspace.
    async fn create_logging_configuration(
        &self,
        workspace_id: &str,
        log_group_arn: &str,
    ) -> Result<LoggingConfigurationStatus, AmpError>;

    /// Point an existing logging configuration at another log group.
    async fn update_logging_configuration(
        &self,
        workspace_id: &str,
        log_group_arn: &str,
    ) -> Result<LoggingConfigurationStatus, AmpError>;

    /// Describe the logging configuration of a workspace.
    async fn describe_logging_configuration(
        &self,
        workspace_id: &str,
    ) -> Result<LoggingConfigurationMetadata, AmpError>;

    /// Delete the logging configuration of a workspace.
    async fn delete_logging_configuration(&self, workspace_id: &str) -> Result<(), AmpError>;
}

/// Desired configuration for the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfigurationConfig {
    /// Workspace id. Changing it forces replacement.
    pub workspace_id: String,
    /// ARN of the log group.
    pub log_group_arn: String,
}

impl LoggingConfigurationConfig {
    /// Create a config.
    pub fn new(workspace_id: impl Into<String>, log_group_arn: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            log_group_arn: log_group_arn.into(),
        }
    }

    /// Decode a config from the lifecycle layer's JSON.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required attributes.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.workspace_id.is_empty() {
            return Err(ProviderError::Validation(
                "workspace_id must not be empty".to_string(),
            ));
        }
        if !self.log_group_arn.starts_with("arn:") {
            return Err(ProviderError::Validation(format!(
                "log_group_arn must be an ARN, got {:?}",
                self.log_group_arn
            )));
        }
        Ok(())
    }
}

/// Recorded state of the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfigurationState {
    /// Resource id, equal to the workspace id.
    pub id: String,
    /// Workspace id.
    pub workspace_id: String,
    /// ARN of the log group.
    pub log_group_arn: String,
}

/// Observes the status code of one workspace's logging configuration.
struct StatusFetcher<'a, C> {
    client: &'a C,
}

#[async_trait::async_trait]
impl<'a, C: AmpApi> Fetcher for StatusFetcher<'a, C> {
    type Error = AmpError;

    async fn fetch(&self, identifier: &str) -> Result<State, AmpError> {
        let status = self.client.describe_logging_configuration(identifier).await?.status;
        let state = State::new(status.status_code);
        Ok(match status.status_reason {
            Some(reason) => state.with_reason(reason),
            None => state,
        })
    }

    fn is_not_found(&self, err: &AmpError) -> bool {
        err.is_not_found()
    }
}

/// CRUD adapter for the logging configuration resource.
pub struct LoggingConfigurationResource<C> {
    client: C,
    timeouts: Timeouts,
    poll: Backoff,
}

impl<C: AmpApi> LoggingConfigurationResource<C> {
    /// Create the adapter with default timeouts.
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
            poll: Backoff::default(),
        }
    }

    /// Set the per-operation timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the polling policy used by the waiters.
    pub fn with_poll(mut self, poll: Backoff) -> Self {
        self.poll = poll;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Create the configuration and wait until it is active.
    #[instrument(skip(self, config), fields(workspace_id = %config.workspace_id))]
    pub async fn create(
        &self,
        config: &LoggingConfigurationConfig,
    ) -> Result<LoggingConfigurationState, ProviderError> {
        config.validate()?;
        debug!(log_group_arn = %config.log_group_arn, "Creating Prometheus Logging Configuration");

        self.client
            .create_logging_configuration(&config.workspace_id, &config.log_group_arn)
            .await
            .map_err(|e| {
                ProviderError::Api(format!(
                    "error creating Prometheus Logging Configuration ({}): {}",
                    config.workspace_id, e
                ))
            })?;

        let id = config.workspace_id.as_str();
        self.wait_created(id).await?;

        info!("Prometheus Logging Configuration created");
        self.read_existing(id, true)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    /// Read the configuration.
    ///
    /// Returns `None` if it no longer exists, meaning it should be removed from state.
    pub async fn read(&self, id: &str) -> Result<Option<LoggingConfigurationState>, ProviderError> {
        self.read_existing(id, false).await
    }

    /// Import an existing configuration by workspace id.
    pub async fn import(&self, id: &str) -> Result<LoggingConfigurationState, ProviderError> {
        self.read_existing(id, false)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("Prometheus Logging Configuration ({})", id)))
    }

    /// Point the configuration at a new log group and wait until it is active.
    #[instrument(skip(self, prior, config), fields(id = %prior.id))]
    pub async fn update(
        &self,
        prior: &LoggingConfigurationState,
        config: &LoggingConfigurationConfig,
    ) -> Result<LoggingConfigurationState, ProviderError> {
        config.validate()?;
        if config.workspace_id != prior.workspace_id {
            return Err(ProviderError::Validation(format!(
                "workspace_id of Prometheus Logging Configuration ({}) cannot change from {} to {} without replacement",
                prior.id, prior.workspace_id, config.workspace_id
            )));
        }

        if config.log_group_arn != prior.log_group_arn {
            debug!(log_group_arn = %config.log_group_arn, "Updating Prometheus Logging Configuration");
            self.client
                .update_logging_configuration(&config.workspace_id, &config.log_group_arn)
                .await
                .map_err(|e| {
                    ProviderError::Api(format!(
                        "error updating Prometheus Logging Configuration ({}): {}",
                        prior.id, e
                    ))
                })?;

            self.wait_updated(&prior.id).await?;
            info!("Prometheus Logging Configuration updated");
        }

        self.read_existing(&prior.id, false)
            .await?
            .ok_or_else(|| ProviderError::NotFound(prior.id.clone()))
    }

    /// Delete the configuration and wait until it is gone.
    #[instrument(skip(self, state), fields(id = %state.id))]
    pub async fn delete(&self, state: &LoggingConfigurationState) -> Result<(), ProviderError> {
        info!("Deleting Prometheus Logging Configuration");

        match self.client.delete_logging_configuration(&state.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Prometheus Logging Configuration already gone");
                return Ok(());
            }
            Err(e) => {
                return Err(ProviderError::Api(format!(
                    "error deleting Prometheus Logging Configuration ({}): {}",
                    state.id, e
                )))
            }
        }

        self.wait_deleted(&state.id).await?;
        Ok(())
    }

    async fn read_existing(
        &self,
        id: &str,
        is_new: bool,
    ) -> Result<Option<LoggingConfigurationState>, ProviderError> {
        match self.client.describe_logging_configuration(id).await {
            Ok(output) => Ok(Some(LoggingConfigurationState {
                id: id.to_string(),
                workspace_id: id.to_string(),
                log_group_arn: output.log_group_arn,
            })),
            Err(e) if e.is_not_found() && !is_new => {
                warn!(id = %id, "Prometheus Logging Configuration not found, removing from state");
                Ok(None)
            }
            Err(e) => Err(ProviderError::Api(format!(
                "error reading Prometheus Logging Configuration ({}): {}",
                id, e
            ))),
        }
    }

    async fn wait_created(&self, id: &str) -> Result<State, WaitError> {
        let spec = self
            .spec(self.timeouts.create)
            .accept([status::ACTIVE])
            .fail_on([status::CREATION_FAILED])
            .tolerate_not_found(CREATE_NOT_FOUND_CHECKS);
        wait(&self.handle(id), spec).await
    }

    async fn wait_updated(&self, id: &str) -> Result<State, WaitError> {
        let spec = self
            .spec(self.timeouts.update)
            .accept([status::ACTIVE])
            .fail_on([status::UPDATE_FAILED]);
        wait(&self.handle(id), spec).await
    }

    async fn wait_deleted(&self, id: &str) -> Result<State, WaitError> {
        wait(&self.handle(id), self.spec(self.timeouts.delete).accept_absence()).await
    }

    fn spec(&self, max_elapsed: Duration) -> WaitSpec {
        WaitSpec::new(max_elapsed).with_poll(self.poll)
    }

    fn handle(&self, id: &str) -> ResourceHandle<StatusFetcher<'_, C>> {
        ResourceHandle::new(id, StatusFetcher { client: &self.client })
    }
}
