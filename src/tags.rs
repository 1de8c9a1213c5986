//! Tag-set reconciliation.
//!
//! [`diff`] computes the minimal delta that turns a resource's current tags
//! into the desired tags, and [`apply`] sends it with at most two remote calls:
//! one batched removal followed by one batched upsert.
//!
//! Keys matched by the reserved predicate are managed by the platform. They
//! never show up in a delta, whichever side they appear on.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_convergence::tags::{diff, is_aws_reserved, TagSet};
//!
//! let current = TagSet::from_iter([("env", "prod"), ("aws:internal", "x")]);
//! let desired = TagSet::from_iter([("env", "staging")]);
//!
//! let delta = diff(&current, &desired, is_aws_reserved);
//! assert!(delta.to_remove.is_empty());
//! assert_eq!(delta.to_upsert.get("env"), Some("staging"));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{TagOperationError, TagPhase};

/// Key prefix reserved by AWS for tags it manages itself.
pub const AWS_RESERVED_PREFIX: &str = "aws:";

/// Returns true for keys under the `aws:` prefix.
pub fn is_aws_reserved(key: &str) -> bool {
    key.starts_with(AWS_RESERVED_PREFIX)
}

/// A reserved predicate matching any of a set of key prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedPrefixes(Vec<String>);

impl ReservedPrefixes {
    /// Create a predicate from prefixes.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(prefixes.into_iter().map(Into::into).collect())
    }

    /// Returns true if `key` starts with one of the prefixes.
    pub fn matches(&self, key: &str) -> bool {
        self.0.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }
}

/// A map from tag key to tag value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tag, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up a tag value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// The underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Drop tags whose keys match `is_reserved`.
    pub fn ignore_reserved(&self, is_reserved: impl Fn(&str) -> bool) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !is_reserved(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Drop tags under the `aws:` prefix.
    pub fn ignore_aws(&self) -> Self {
        self.ignore_reserved(is_aws_reserved)
    }

    /// Tags present here but absent from `desired`.
    pub fn removed(&self, desired: &TagSet) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !desired.0.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Tags in `desired` that are new or carry a different value than here.
    pub fn updated(&self, desired: &TagSet) -> Self {
        Self(
            desired
                .0
                .iter()
                .filter(|(k, v)| self.0.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl From<std::collections::HashMap<String, String>> for TagSet {
    fn from(map: std::collections::HashMap<String, String>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl IntoIterator for TagSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The changes needed to move a resource from its current tags to the desired tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDelta {
    /// Keys to remove.
    pub to_remove: BTreeSet<String>,
    /// Tags to add or overwrite.
    pub to_upsert: TagSet,
}

impl TagDelta {
    /// Returns true if applying the delta would make no calls.
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_upsert.is_empty()
    }
}

/// Compute the delta from `current` to `desired`, ignoring reserved keys.
pub fn diff(current: &TagSet, desired: &TagSet, is_reserved: impl Fn(&str) -> bool) -> TagDelta {
    let to_remove = current
        .0
        .keys()
        .filter(|k| !is_reserved(k.as_str()) && !desired.0.contains_key(*k))
        .cloned()
        .collect();

    let to_upsert = desired
        .0
        .iter()
        .filter(|(k, v)| !is_reserved(k.as_str()) && current.0.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<BTreeMap<_, _>>()
        .into();

    TagDelta {
        to_remove,
        to_upsert,
    }
}

/// Remote tagging calls for one kind of resource.
#[async_trait::async_trait]
pub trait TagMutator: Send + Sync {
    /// The error type returned by the tagging calls.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Remove all of `keys` from the resource in one call.
    async fn remove_tags(&self, identifier: &str, keys: &[String]) -> Result<(), Self::Error>;

    /// Add or overwrite all of `tags` on the resource in one call.
    async fn upsert_tags(&self, identifier: &str, tags: &TagSet) -> Result<(), Self::Error>;
}

/// Apply `delta` to the resource named by `identifier`.
///
/// Removals are sent before upserts. If the removal fails, no upsert is sent.
/// Nothing is retried.
///
/// # Arguments
///
/// * `mutator` - Client for the resource's tagging API
/// * `identifier` - Remote identifier of the resource, usually its ARN
/// * `delta` - The changes to send, as produced by [`diff`]
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_convergence::tags::{apply, diff, is_aws_reserved};
///
/// let delta = diff(&prior_tags, &planned_tags, is_aws_reserved);
/// apply(&client, &arn, &delta).await?;
/// ```
#[instrument(
    skip(mutator, delta),
    name = "tags.apply",
    fields(remove = delta.to_remove.len(), upsert = delta.to_upsert.len())
)]
pub async fn apply<M: TagMutator>(
    mutator: &M,
    identifier: &str,
    delta: &TagDelta,
) -> Result<(), TagOperationError> {
    if !delta.to_remove.is_empty() {
        let keys: Vec<String> = delta.to_remove.iter().cloned().collect();
        debug!(keys = ?keys, "Removing tags");
        mutator
            .remove_tags(identifier, &keys)
            .await
            .map_err(|e| TagOperationError {
                identifier: identifier.to_string(),
                phase: TagPhase::Remove,
                source: Box::new(e),
            })?;
    }

    if !delta.to_upsert.is_empty() {
        debug!(keys = ?delta.to_upsert.keys(), "Upserting tags");
        mutator
            .upsert_tags(identifier, &delta.to_upsert)
            .await
            .map_err(|e| TagOperationError {
                identifier: identifier.to_string(),
                phase: TagPhase::Upsert,
                source: Box::new(e),
            })?;
    }

    Ok(())
}

/// Diff `current` against `desired` and apply the result.
///
/// Returns the delta that was applied. An empty delta makes no remote calls.
///
/// # Arguments
///
/// * `mutator` - Client for the resource's tagging API
/// * `identifier` - Remote identifier of the resource
/// * `current` - Tags the resource carries now
/// * `desired` - Tags the configuration asks for
/// * `is_reserved` - Keys matching this predicate are never touched
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_convergence::tags::reconcile;
///
/// let reserved = config.reserved_prefixes();
/// let delta = reconcile(&client, &arn, &old_tags, &new_tags, |k| reserved.matches(k)).await?;
/// tracing::debug!(removed = delta.to_remove.len(), "Tags updated");
/// ```
pub async fn reconcile<M: TagMutator>(
    mutator: &M,
    identifier: &str,
    current: &TagSet,
    desired: &TagSet,
    is_reserved: impl Fn(&str) -> bool,
) -> Result<TagDelta, TagOperationError> {
    let delta = diff(current, desired, is_reserved);
    if delta.is_empty() {
        debug!(identifier = %identifier, "Tags already up to date");
        return Ok(delta);
    }
    apply(mutator, identifier, &delta).await?;
    Ok(delta)
}
