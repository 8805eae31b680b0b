//! Risk quantification engine.
//!
//! A registry of risk methodologies whose calculation routines are
//! validated statically and executed in a resource-limited sandbox,
//! plus native implementations of the standard algorithms.

pub mod algorithms;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod executor;
pub mod methodology;
pub mod registry;
pub mod rng;
pub mod routines;
pub mod script;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod validator;
