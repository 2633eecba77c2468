pub mod client;
pub mod types;

pub use client::{
    GeminiClient, GeminiReader, GeminiWriter, LIVE_URL, connect, connect_with_url, decode_inline,
};
