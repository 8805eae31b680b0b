//! Shared primitive types used across the engine.

use chrono::{DateTime, Utc};

/// A stable, unique methodology identifier (UUID v4 string).
pub type MethodologyId = String;

/// All registry timestamps are UTC.
pub type Timestamp = DateTime<Utc>;

/// Seed for a single run's RNG stream.
pub type Seed = u64;
