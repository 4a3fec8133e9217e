/// Job identifiers are opaque strings assigned by the job engine.
pub type JobId = String;

/// Monotonic per-job event sequence marker (`id` field of a stream frame).
pub type EventSequence = u64;
