//! Path of Building export decoding for BuildLens.
//!
//! Turns a PoB XML export into the [`BuildDescription`] entity model:
//! build header, player stats, socket groups, equipped items, allocated
//! passive nodes. Pure and deterministic; the caller reads the file.
//!
//! [`BuildDescription`]: buildlens_shared::BuildDescription

pub mod parser;

pub use parser::decode_build;
