//! Store-backed sequence numbers

use std::sync::Arc;

use crate::store::{KeyValueStore, StoreResult};

pub const SEQUENCE_KEY: &str = "smpp_last_sequence_number";

/// Largest sequence number SMPP allows
pub const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;

/// Draws sequence numbers from an atomic counter in the instance namespace,
/// so they keep increasing across restarts and wrap within `1..=MAX_SEQUENCE`
#[derive(Clone)]
pub struct SequenceGenerator {
    store: Arc<dyn KeyValueStore>,
}

impl SequenceGenerator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn next(&self) -> StoreResult<u32> {
        let counter = self.store.incr(SEQUENCE_KEY).await?;
        Ok(wrap(counter))
    }
}

fn wrap(counter: i64) -> u32 {
    ((counter - 1).rem_euclid(MAX_SEQUENCE as i64) + 1) as u32
}
