pub mod client;
pub mod models;
pub mod streaming;

pub use client::FallbackClient;
pub use models::{ChatRequest, HistoryEntry, HistoryResponse};
pub use streaming::{decode_body, ChunkDecoder};
