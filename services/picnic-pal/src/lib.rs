pub mod config;
pub mod gemini_adapter;
pub mod speech_adapter;
