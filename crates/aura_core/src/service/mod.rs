//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate interpreter, validator, resolver and store into the
//!   utterance-level routing pipeline.
//! - Keep transport/presentation layers decoupled from business logic.

pub mod router;
