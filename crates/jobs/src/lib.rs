//! Resumable job trackers for the closet backend.
//!
//! - [`extraction`] -- bulk AI image extraction (upload, per-image
//!   extraction, per-item image generation).
//! - [`social_import`] -- social-media wardrobe import with review and
//!   authentication steps.
//! - [`pointer`] -- durable single-slot "active job" pointer enabling
//!   resume after restart.
//! - [`api`] -- HTTP client for the job endpoints.
//! - [`config`] -- environment-driven client configuration.
//!
//! Each orchestrator owns exactly one event subscription per job and
//! publishes its job state through a `tokio::sync::watch` channel.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod pointer;
pub mod social_import;
pub mod tracker;

pub use error::JobError;
