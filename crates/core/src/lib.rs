//! Shared building blocks for the closet job client.
//!
//! Holds the identifier aliases, the [`JobFamily`](job::JobFamily)
//! discriminator, the crate-wide [`CoreError`](error::CoreError) and
//! the request retry helper used by every command call.

pub mod error;
pub mod job;
pub mod retry;
pub mod types;
