pub mod config;
pub mod content;
pub mod error;
pub mod gemini;
pub mod server;

pub use config::AppConfig;
pub use content::{GenerationInput, GenerationResult};
pub use error::ServiceError;
pub use gemini::{CaptionModel, GeminiClient};
pub use server::build_router;
