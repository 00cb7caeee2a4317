//! Event ingest: chunks and the producer-to-consumer handoff.

pub mod chunk;
pub mod worker;
