use serde::{Deserialize, Serialize};

/// Input to one generation call. The two variants are mutually exclusive by
/// construction; there is no combined image-plus-brief request.
#[derive(Debug, Clone)]
pub enum GenerationInput {
    Image { bytes: Vec<u8>, mime_type: String },
    TextBrief(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub caption: String,
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashtagSet {
    pub hashtags: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingTime {
    pub time: String,
    pub day: String,
    pub reason: String,
}

/// The response shape every successful request returns. Always carries
/// exactly three captions and three non-empty hashtag sets; the parser pads
/// under-filled AI output before this struct is handed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub captions: Vec<Caption>,
    pub hashtag_sets: Vec<HashtagSet>,
    pub posting_time: PostingTime,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct TextBriefRequest {
    pub text_brief: String,
}
