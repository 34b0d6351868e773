//! Fingerprinting and first-sight registration of inbound messages.

use std::{sync::Arc, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    chrono::TimeDelta,
    sha2::{Digest, Sha256},
    switchboard_common::Message,
    switchboard_store::{StateStore, WriteBatch},
    tracing::{debug, info},
};

use crate::{
    Result,
    keys::{Keyspace, decode, encode},
};

/// Dedup key for a message: the customer id plus a digest of the content.
///
/// Arrival time is not part of the key.
pub fn fingerprint(customer_id: &str, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{customer_id}:{}", URL_SAFE_NO_PAD.encode(digest))
}

/// Messages-map field an expired record is kept under once its fingerprint
/// is registered again.
pub fn archived_field(fingerprint: &str, message: &Message) -> String {
    format!("{fingerprint}@{}", message.received_at.timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    Duplicate,
}

/// Atomic test-and-register of message fingerprints.
pub struct Deduplicator {
    store: Arc<dyn StateStore>,
    keys: Keyspace,
    window: Option<Duration>,
}

impl Deduplicator {
    /// `window` bounds how long a fingerprint suppresses repeats. `None`
    /// keeps it forever.
    pub fn new(store: Arc<dyn StateStore>, keys: Keyspace, window: Option<Duration>) -> Self {
        Self {
            store,
            keys,
            window,
        }
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Insert `message` as a pending record unless its fingerprint is taken.
    ///
    /// With a window configured, a record older than the window is moved to
    /// [`archived_field`] and replaced by compare-and-swap, so two racing
    /// repeats still yield one `New` and the earlier record is kept.
    pub async fn register(&self, message: &Message) -> Result<Registration> {
        let map = self.keys.messages();
        let fp = message.fingerprint.as_str();
        let raw = encode(fp, message)?;

        if self.store.hset_nx(map, fp, &raw).await? {
            debug!(fingerprint = fp, customer_id = %message.customer_id, "new message registered");
            return Ok(Registration::New);
        }

        let Some(window) = self.window.and_then(|w| TimeDelta::from_std(w).ok()) else {
            debug!(fingerprint = fp, "duplicate message");
            return Ok(Registration::Duplicate);
        };

        let Some(existing_raw) = self.store.hget(map, fp).await? else {
            return Ok(if self.store.hset_nx(map, fp, &raw).await? {
                Registration::New
            } else {
                Registration::Duplicate
            });
        };
        let existing: Message = decode(fp, &existing_raw)?;

        if message.received_at - existing.received_at < window {
            debug!(fingerprint = fp, first_seen = %existing.received_at, "duplicate message within window");
            return Ok(Registration::Duplicate);
        }

        let archived = archived_field(fp, &existing);
        let mut batch = WriteBatch::new();
        batch
            .expect_field(map, fp, Some(&existing_raw))
            .hset(map, &archived, existing_raw.as_str())
            .hset(map, fp, raw);
        if self.store.commit(batch).await? {
            info!(
                fingerprint = fp,
                first_seen = %existing.received_at,
                archived = %archived,
                "repeated message outside dedup window, registered again"
            );
            Ok(Registration::New)
        } else {
            Ok(Registration::Duplicate)
        }
    }
}
