mod client;
mod types;

pub use client::{CaptionModel, GeminiClient};
