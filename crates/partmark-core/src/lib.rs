//! partmark-core — Exact-credit feedback ledger, marking scripts, and part
//! scoring.
//!
//! This crate defines the marking pipeline for multi-part questions: marking
//! scripts are compiled against an expression scope, their feedback
//! operations are replayed into exact credit, and parts turn credit into a
//! score. The expression language, the question and persistence are
//! collaborators behind the traits in [`traits`].

pub mod adaptive;
pub mod alternatives;
pub mod config;
pub mod credit;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod mock;
pub mod model;
pub mod overrides;
pub mod parser;
pub mod report;
pub mod scorer;
pub mod script;
pub mod traits;
pub mod value;
