//! Shared primitive types used across the service.

/// Milliseconds since the Unix epoch, as stored in `createdAt` fields.
pub type TimestampMs = i64;

/// A month marker in `YYYY-MM` form (e.g. `"2026-10"`).
pub type MonthKey = String;

/// A store key produced by `Uuid::new_v4()`.
pub type RecordId = String;

/// A validated star rating, 1..=5.
pub type Rating = u8;
