use serde::{Deserialize, Serialize};

use crate::{clock::Timestamp, entry::Entry};

pub mod aof;
pub mod snapshot;

/// One durable mutation, as recorded in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Set {
        key: String,
        entry: Entry,
    },
    Delete {
        key: String,
    },
    Expire {
        key: String,
        expires_at: Option<Timestamp>,
    },
}
