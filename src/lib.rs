#![deny(missing_docs)]
//! Muskan music bot library.
//!
//! A Telegram bot that queues search-and-fetch audio requests, manages
//! per-group settings and welcome messages, and relays messages between
//! users and the bot admin.

/// Telegram transport.
pub mod bot;
/// Configuration management.
pub mod config;
/// Delivery collaborator interface.
pub mod delivery;
/// Error taxonomy.
pub mod error;
/// Group settings store.
pub mod groups;
/// Search and extraction collaborator.
pub mod media;
/// Media queue engine.
pub mod queue;
/// Per-user rate limiting.
pub mod rate_limit;
/// Admin relay table and ban set.
pub mod relay;
/// Coordinating service object.
pub mod service;
/// Utility functions.
pub mod utils;
/// Welcome capture flow.
pub mod welcome;
