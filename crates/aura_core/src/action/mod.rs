//! Action schema validation.
//!
//! # Responsibility
//! - Turn untyped candidate payloads into well-typed `Action` values.
//! - Surface schema violations with the offending field named.
//!
//! # Invariants
//! - Validation is purely structural: no store access, no I/O.

pub mod schema;
