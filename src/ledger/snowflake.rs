//! Snowflake-style identifier generation
//!
//! Layout of a generated id (most significant bit first):
//!
//! ```text
//! 0 | 41 bits: ms since epoch | 10 bits: node | 12 bits: sequence
//! ```
//!
//! Ids from one generator are strictly increasing. If the sequence for a
//! millisecond is exhausted, or the wall clock steps backwards, the generator
//! keeps counting on top of the last timestamp it issued instead of waiting.

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;

use super::record::RecordId;

/// Default epoch, 2010-11-04T01:42:54.657Z
pub const DEFAULT_EPOCH_MS: i64 = 1_288_834_974_657;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("node id {0} out of range (max {MAX_NODE_ID})")]
    NodeOutOfRange(u16),
}

#[derive(Debug)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Unique, time-sortable id source owned by one ledger
#[derive(Debug)]
pub struct IdGenerator {
    node: u16,
    epoch_ms: i64,
    state: Mutex<State>,
}

/// Fields packed into an id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub timestamp_ms: i64,
    pub node: u16,
    pub sequence: u16,
}

impl IdGenerator {
    pub fn new(node: u16) -> Result<Self, IdError> {
        Self::with_epoch(node, DEFAULT_EPOCH_MS)
    }

    pub fn with_epoch(node: u16, epoch_ms: i64) -> Result<Self, IdError> {
        if node > MAX_NODE_ID {
            return Err(IdError::NodeOutOfRange(node));
        }
        Ok(Self {
            node,
            epoch_ms,
            state: Mutex::new(State {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn next_id(&self) -> RecordId {
        let wall = (Utc::now().timestamp_millis() - self.epoch_ms).max(0);

        let mut state = self.state.lock();
        let mut ms = wall.max(state.last_ms);
        if ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                ms += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = ms;

        RecordId((ms << TIMESTAMP_SHIFT) | (i64::from(self.node) << SEQUENCE_BITS) | state.sequence)
    }

    pub fn decompose(&self, id: RecordId) -> IdParts {
        let raw = id.as_i64();
        IdParts {
            timestamp_ms: (raw >> TIMESTAMP_SHIFT) + self.epoch_ms,
            node: ((raw >> SEQUENCE_BITS) & i64::from(MAX_NODE_ID)) as u16,
            sequence: (raw & SEQUENCE_MASK) as u16,
        }
    }
}
