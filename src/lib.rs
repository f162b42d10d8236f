//! Ghost → Listmonk automation connector.
//!
//! Receives signed Ghost webhooks, matches them against user-defined Sons
//! and runs their Listmonk actions on a durable background queue.

pub mod api;
pub mod config;
pub mod duration;
pub mod error;
pub mod executor;
pub mod listmonk;
pub mod logs;
pub mod pipeline;
pub mod queue;
pub mod sons;
pub mod store;
