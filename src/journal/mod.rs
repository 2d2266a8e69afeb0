//! Run journal: append-only JSONL events and BLAKE3 content digests.

pub mod eventlog;
pub mod hasher;
