mod parser;
mod prompt;
mod types;

pub use parser::{ParseOutcome, parse};
pub use prompt::{image_prompt, text_prompt};
pub use types::{
    Caption, GenerationInput, GenerationResult, HashtagSet, PostingTime, TextBriefRequest,
};
