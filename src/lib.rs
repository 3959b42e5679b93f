//! Terminal client for a streaming agent backend.
//!
//! Turns arrive over a shared WebSocket channel when it is up and over a
//! chunked HTTP response when it is not; [`engine::Conversation`] folds either
//! stream into one stable message list.

pub mod api;
pub mod chat;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;
pub mod ui;

pub use chat::{ChatHandle, ChatOptions, ChatSession, ChatView};
pub use error::{ChatError, Result};
