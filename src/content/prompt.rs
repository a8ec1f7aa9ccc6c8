//! Instruction prompt sent to the generative model.
//!
//! The template pins the output shape down hard enough that the parser can
//! decode it deterministically: three captions with distinct tones, three
//! labeled hashtag sets, one posting-time recommendation, all as bare JSON.

const SYSTEM_PREAMBLE: &str = "\
You are a creative social media expert specializing in crafting engaging captions and hashtags.

Your task is to generate social media content that is:
- Engaging and attention-grabbing
- Platform-appropriate (Instagram/Facebook/Twitter style)
- Includes emojis where appropriate
- Optimized for maximum engagement
- Authentic and relatable

Generate content in JSON format ONLY, with no additional text or markdown formatting.";

const OUTPUT_SHAPE: &str = r##"Return ONLY a valid JSON object with this exact structure (no markdown, no code blocks):
{
  "captions": [
    {"caption": "first creative caption here", "tone": "Casual"},
    {"caption": "second creative caption here", "tone": "Professional"},
    {"caption": "third creative caption here", "tone": "Playful"}
  ],
  "hashtag_sets": [
    {"hashtags": ["#tag1", "#tag2", "#tag3", "#tag4", "#tag5"], "category": "Trending"},
    {"hashtags": ["#tag1", "#tag2", "#tag3", "#tag4", "#tag5"], "category": "Niche"},
    {"hashtags": ["#tag1", "#tag2", "#tag3", "#tag4", "#tag5"], "category": "Branded"}
  ],
  "posting_time": {
    "time": "recommended time range",
    "day": "recommended day(s)",
    "reason": "brief explanation why"
  },
  "content_type": "detected content category"
}

Make captions creative, engaging, and emoji-rich. Ensure hashtags are relevant and trending."##;

/// Prompt for an image upload. The image itself travels as an inline-data
/// part next to this text.
pub fn image_prompt() -> String {
    format!(
        "{SYSTEM_PREAMBLE}\n\nAnalyze this product image and generate social media content.\n\n{OUTPUT_SHAPE}"
    )
}

/// Prompt for a text brief.
pub fn text_prompt(text_brief: &str) -> String {
    format!(
        "{SYSTEM_PREAMBLE}\n\nProduct/Content Brief: {text_brief}\n\nBased on this brief, generate creative social media content.\n\n{OUTPUT_SHAPE}"
    )
}
