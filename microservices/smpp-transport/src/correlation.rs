//! TTL-bounded correlation between protocol identifiers and message ids
//!
//! Three mappings live in the instance namespace:
//!
//! | key                       | value                | lifetime            |
//! |---------------------------|----------------------|---------------------|
//! | `sequence_number:<n>`     | internal message id  | `sequence`          |
//! | `remote_message:<peer>`   | internal message id  | `remote_id`         |
//! | `message:<internal id>`   | outbound message JSON| `cached_message`    |
//!
//! Multipart bookkeeping sits next to them, all with the `sequence` lifetime:
//! `submission:<id>` (segment count and reference), `resolved:<id>` (accepted
//! segments) and `failed:<id>` (set once any segment is rejected).
//!
//! Values carry their own deadline, so an entry whose expiry call was lost
//! is still treated as absent once the deadline passes.

use brivas_core::{MessageId, OutboundMessage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationTtls {
    pub sequence: Duration,
    pub remote_id: Duration,
    pub cached_message: Duration,
}

impl Default for CorrelationTtls {
    fn default() -> Self {
        Self {
            sequence: Duration::from_secs(7 * 24 * 60 * 60),
            remote_id: Duration::from_secs(7 * 24 * 60 * 60),
            cached_message: Duration::from_secs(12 * 60 * 60),
        }
    }
}

/// How an outbound message went out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub segments: usize,
    /// Links the segments of a multipart message
    pub reference: u16,
}

/// State of a message after one of its segments was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentResolution {
    /// Every segment has now been accepted
    Complete,
    /// This many segments are still unresolved
    Outstanding(usize),
    /// The message was already complete
    Duplicate,
    /// Another segment of the message was rejected
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    /// Absolute deadline, epoch milliseconds
    deadline: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segment: Option<usize>,
}

#[derive(Clone)]
pub struct CorrelationStore {
    store: Arc<dyn KeyValueStore>,
    ttls: CorrelationTtls,
}

impl CorrelationStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttls: CorrelationTtls) -> Self {
        Self { store, ttls }
    }

    pub fn ttls(&self) -> CorrelationTtls {
        self.ttls
    }

    pub async fn set_sequence_message_id(&self, sequence_number: u32, message_id: &MessageId) -> Result<()> {
        self.set_sequence_segment(sequence_number, message_id, 0).await
    }

    /// Map `sequence_number` to segment `segment` of `message_id`
    pub async fn set_sequence_segment(
        &self,
        sequence_number: u32,
        message_id: &MessageId,
        segment: usize,
    ) -> Result<()> {
        self.put_envelope(
            &sequence_key(sequence_number),
            message_id.as_str(),
            Some(segment),
            self.ttls.sequence,
        )
        .await
    }

    pub async fn get_sequence_message_id(&self, sequence_number: u32) -> Result<Option<MessageId>> {
        Ok(self
            .get_sequence_segment(sequence_number)
            .await?
            .map(|(message_id, _)| message_id))
    }

    pub async fn get_sequence_segment(&self, sequence_number: u32) -> Result<Option<(MessageId, usize)>> {
        Ok(self
            .fetch_envelope(&sequence_key(sequence_number))
            .await?
            .map(|e| (MessageId::from(e.value), e.segment.unwrap_or(0))))
    }

    pub async fn set_remote_message_id(&self, message_id: &MessageId, remote_id: &str) -> Result<()> {
        self.put(&remote_key(remote_id), message_id.as_str(), self.ttls.remote_id)
            .await
    }

    pub async fn get_internal_message_id(&self, remote_id: &str) -> Result<Option<MessageId>> {
        Ok(self.fetch(&remote_key(remote_id)).await?.map(MessageId::from))
    }

    pub async fn cache_message(&self, message: &OutboundMessage) -> Result<()> {
        let json = message.to_json()?;
        self.put(&message_key(&message.message_id), &json, self.ttls.cached_message)
            .await
    }

    pub async fn get_cached_message(&self, message_id: &MessageId) -> Result<Option<OutboundMessage>> {
        match self.fetch(&message_key(message_id)).await? {
            Some(json) => Ok(Some(OutboundMessage::from_json(&json)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a live entry was removed
    pub async fn delete_cached_message(&self, message_id: &MessageId) -> Result<bool> {
        let key = message_key(message_id);
        let live = self.fetch(&key).await?.is_some();
        let deleted = self.store.delete(&key).await?;
        Ok(live && deleted)
    }

    /// Record a fresh submission, forgetting any earlier outcome for the id
    pub async fn begin_submission(&self, message_id: &MessageId, submission: Submission) -> Result<()> {
        self.store.delete(&resolved_key(message_id)).await?;
        self.store.delete(&failed_key(message_id)).await?;
        let json = serde_json::to_string(&submission)?;
        self.put(&submission_key(message_id), &json, self.ttls.sequence)
            .await
    }

    pub async fn get_submission(&self, message_id: &MessageId) -> Result<Option<Submission>> {
        let Some(json) = self.fetch(&submission_key(message_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(submission) => Ok(Some(submission)),
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Discarding malformed submission record");
                Ok(None)
            }
        }
    }

    /// Count one accepted segment of `message_id`.
    ///
    /// Without a submission record the message is taken to be a single segment.
    pub async fn resolve_segment(&self, message_id: &MessageId) -> Result<SegmentResolution> {
        if self.fetch(&failed_key(message_id)).await?.is_some() {
            return Ok(SegmentResolution::Failed);
        }
        let segments = self
            .get_submission(message_id)
            .await?
            .map_or(1, |s| s.segments.max(1));

        let key = resolved_key(message_id);
        let resolved = self.store.incr(&key).await?;
        self.store.expire(&key, self.ttls.sequence).await?;
        let resolved = usize::try_from(resolved).unwrap_or_default();

        Ok(match resolved.cmp(&segments) {
            Ordering::Less => SegmentResolution::Outstanding(segments - resolved),
            Ordering::Equal => SegmentResolution::Complete,
            Ordering::Greater => SegmentResolution::Duplicate,
        })
    }

    /// Flag `message_id` as rejected; false when it already was
    pub async fn mark_failed(&self, message_id: &MessageId) -> Result<bool> {
        let key = failed_key(message_id);
        if self.fetch(&key).await?.is_some() {
            return Ok(false);
        }
        self.put(&key, "1", self.ttls.sequence).await?;
        Ok(true)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.put_envelope(key, value, None, ttl).await
    }

    async fn put_envelope(&self, key: &str, value: &str, segment: Option<usize>, ttl: Duration) -> Result<()> {
        let envelope = Envelope {
            value: value.to_string(),
            deadline: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            segment,
        };
        self.store.set(key, &serde_json::to_string(&envelope)?).await?;
        if !self.store.expire(key, ttl).await? {
            debug!(key, "Key vanished before expiry was set");
        }
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        Ok(self.fetch_envelope(key).await?.map(|e| e.value))
    }

    async fn fetch_envelope(&self, key: &str) -> Result<Option<Envelope>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed correlation entry");
                return Ok(None);
            }
        };
        if envelope.deadline <= Utc::now().timestamp_millis() {
            debug!(key, "Correlation entry past its deadline");
            return Ok(None);
        }
        Ok(Some(envelope))
    }
}

fn sequence_key(sequence_number: u32) -> String {
    format!("sequence_number:{}", sequence_number)
}

fn remote_key(remote_id: &str) -> String {
    format!("remote_message:{}", remote_id)
}

fn submission_key(message_id: &MessageId) -> String {
    format!("submission:{}", message_id)
}

fn resolved_key(message_id: &MessageId) -> String {
    format!("resolved:{}", message_id)
}

fn failed_key(message_id: &MessageId) -> String {
    format!("failed:{}", message_id)
}

fn message_key(message_id: &MessageId) -> String {
    format!("message:{}", message_id)
}
