//! Core pipeline orchestration and domain logic for BuildLens.
//!
//! This crate ties together build decoding, entity extraction, cache-first
//! enrichment coordination, context assembly, and reporting into the
//! end-to-end `analyze` workflow.

pub mod backoff;
pub mod coordinator;
pub mod extract;
pub mod merge;
pub mod pipeline;
pub mod report;
