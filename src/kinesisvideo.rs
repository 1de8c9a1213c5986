//! Kinesis Video stream tagging.

use tracing::debug;

use crate::error::{ProviderError, TagOperationError};
use crate::tags::{self, is_aws_reserved, TagDelta, TagMutator, TagSet};

/// The Kinesis Video tagging API.
#[async_trait::async_trait]
pub trait KinesisVideoApi: Send + Sync {
    /// The client's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// `ListTagsForStream`.
    async fn list_tags_for_stream(&self, stream_arn: &str) -> Result<TagSet, Self::Error>;

    /// `UntagStream`.
    async fn untag_stream(&self, stream_arn: &str, tag_keys: &[String]) -> Result<(), Self::Error>;

    /// `TagStream`.
    async fn tag_stream(&self, stream_arn: &str, tags: &TagSet) -> Result<(), Self::Error>;
}

/// Adapts a [`KinesisVideoApi`] client to [`TagMutator`].
pub struct StreamTagger<'a, C> {
    conn: &'a C,
}

impl<'a, C: KinesisVideoApi> StreamTagger<'a, C> {
    /// Wrap a client.
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl<'a, C: KinesisVideoApi> TagMutator for StreamTagger<'a, C> {
    type Error = C::Error;

    async fn remove_tags(&self, identifier: &str, keys: &[String]) -> Result<(), C::Error> {
        self.conn.untag_stream(identifier, keys).await
    }

    async fn upsert_tags(&self, identifier: &str, tags: &TagSet) -> Result<(), C::Error> {
        self.conn.tag_stream(identifier, tags).await
    }
}

/// List the tags of a stream.
pub async fn list_tags<C: KinesisVideoApi>(
    conn: &C,
    stream_arn: &str,
) -> Result<TagSet, ProviderError> {
    conn.list_tags_for_stream(stream_arn)
        .await
        .map_err(|e| ProviderError::Api(format!("error listing tags for resource ({}): {}", stream_arn, e)))
}

/// Move a stream's tags from `old_tags` to `new_tags`, leaving `aws:` keys alone.
///
/// Returns the delta that was sent.
pub async fn update_tags<C: KinesisVideoApi>(
    conn: &C,
    stream_arn: &str,
    old_tags: &TagSet,
    new_tags: &TagSet,
) -> Result<TagDelta, TagOperationError> {
    tags::reconcile(
        &StreamTagger::new(conn),
        stream_arn,
        old_tags,
        new_tags,
        is_aws_reserved,
    )
    .await
}

/// Read a stream's live tags and bring them to `desired`.
///
/// Tags added out of band are removed unless `is_reserved` matches them.
pub async fn sync_tags<C: KinesisVideoApi>(
    conn: &C,
    stream_arn: &str,
    desired: &TagSet,
    is_reserved: impl Fn(&str) -> bool,
) -> Result<TagDelta, ProviderError> {
    let current = list_tags(conn, stream_arn).await?;
    let delta = tags::diff(&current, desired, is_reserved);
    if delta.is_empty() {
        return Ok(delta);
    }

    debug!(
        stream_arn = %stream_arn,
        remove = delta.to_remove.len(),
        upsert = delta.to_upsert.len(),
        "Stream tags drifted"
    );
    tags::apply(&StreamTagger::new(conn), stream_arn, &delta).await?;
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagPhase;
    use crate::tags::ReservedPrefixes;
    use crate::testing::{InMemoryTagService, TagCall};
    use tokio_test::{assert_err, assert_ok};

    const ARN: &str = "arn:aws:kinesisvideo:us-west-2:123456789012:stream/cam/1";

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_list_tags() {
        let service = InMemoryTagService::with_tags(ARN, tags(&[("env", "prod")]));
        let listed = assert_ok!(list_tags(&service, ARN).await);
        assert_eq!(listed, tags(&[("env", "prod")]));

        let err = assert_err!(list_tags(&service, "arn:missing").await);
        assert!(err.to_string().contains("arn:missing"));
    }

    #[tokio::test]
    async fn test_update_tags_no_change() {
        let service = InMemoryTagService::with_tags(ARN, tags(&[("env", "prod")]));
        let old = tags(&[("env", "prod")]);

        let delta = assert_ok!(update_tags(&service, ARN, &old, &old).await);
        assert!(delta.is_empty());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_tags_keeps_aws_keys() {
        let current = tags(&[("env", "prod"), ("owner", "a"), ("aws:internal", "x")]);
        let service = InMemoryTagService::with_tags(ARN, current.clone());

        let desired = tags(&[("env", "staging")]);
        assert_ok!(update_tags(&service, ARN, &current, &desired).await);

        assert_eq!(
            service.tags(ARN),
            tags(&[("env", "staging"), ("aws:internal", "x")])
        );
        assert_eq!(
            service.calls(),
            vec![
                TagCall::Remove {
                    identifier: ARN.to_string(),
                    keys: vec!["owner".to_string()],
                },
                TagCall::Upsert {
                    identifier: ARN.to_string(),
                    tags: tags(&[("env", "staging")]),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_update_tags_untag_failure() {
        let service = InMemoryTagService::with_tags(ARN, tags(&[("old", "1")]));
        service.fail_removals("AccessDeniedException");

        let err = assert_err!(update_tags(&service, ARN, &tags(&[("old", "1")]), &tags(&[("new", "1")])).await);
        assert_eq!(err.phase, TagPhase::Remove);
        assert_eq!(
            err.to_string(),
            format!("error untagging resource ({}): AccessDeniedException", ARN)
        );
    }

    #[tokio::test]
    async fn test_sync_tags_removes_drift() {
        let service = InMemoryTagService::with_tags(
            ARN,
            tags(&[("env", "prod"), ("manual", "1"), ("hemmer:managed", "true")]),
        );
        let reserved = ReservedPrefixes::new(["aws:", "hemmer:"]);

        let delta = assert_ok!(
            sync_tags(&service, ARN, &tags(&[("env", "prod")]), |k| reserved.matches(k)).await
        );
        assert_eq!(delta.to_remove.iter().collect::<Vec<_>>(), vec!["manual"]);
        assert_eq!(
            service.tags(ARN),
            tags(&[("env", "prod"), ("hemmer:managed", "true")])
        );

        let second = assert_ok!(
            sync_tags(&service, ARN, &tags(&[("env", "prod")]), |k| reserved.matches(k)).await
        );
        assert!(second.is_empty());
    }
}
