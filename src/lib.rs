//! chat-relay — resilient chat-completion dispatch.
//!
//! Sends a prompt to a primary OpenAI-compatible endpoint, retries
//! transient failures with linear backoff, fails over once to a
//! secondary on HTTP 429, writes every attempt to a durable usage log,
//! and notifies an operator at most once per day about rate limiting.

pub mod adapters;
pub mod alert;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod usage;
