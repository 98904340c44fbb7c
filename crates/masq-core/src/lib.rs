//! # masq-core — The export core of MASQ
//!
//! Everything that can be computed without touching the network or the
//! filesystem lives here: the persisted descriptor model, the query planner
//! that compiles a descriptor into SQL, the anonymization rule engine that
//! turns the options document into a per-column function vector, and the
//! CSV record encoder.
//!
//! The hub crate drives these pieces from its async pipeline; this crate
//! stays synchronous and side-effect free so every rule and plan is unit
//! testable in isolation.

pub mod csv;
pub mod descriptor;
pub mod plan;
pub mod rules;

/// A single result row: one rendered string cell per projected column.
pub type Row = Vec<String>;
