//! Best-effort decoding of the model's raw text into a [`GenerationResult`].
//!
//! Models are told to emit bare JSON but routinely wrap it in markdown fences
//! or drop fields. The policy here is deliberate leniency: strip fences, dig
//! the first JSON object out of surrounding chatter, then pad or default any
//! missing pieces so the caller always gets exactly three captions and three
//! non-empty hashtag sets. Every repair is reported as a warning so the
//! leniency stays observable. Only text with no decodable JSON object at all
//! fails the request.

use serde::Deserialize;

use crate::content::types::{Caption, GenerationResult, HashtagSet, PostingTime};
use crate::error::ServiceError;

const EXPECTED_COUNT: usize = 3;
const FALLBACK_TONES: [&str; 3] = ["Casual", "Professional", "Playful"];
const FALLBACK_CATEGORIES: [&str; 3] = ["Trending", "Niche", "Branded"];
const FALLBACK_HASHTAGS: [&str; 3] = ["#NewArrival", "#MustHave", "#Trending"];

/// Outcome of a parse: either the model's output decoded cleanly, or it was
/// repaired and the warnings say what had to be filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Clean(GenerationResult),
    Recovered(GenerationResult, Vec<String>),
}

impl ParseOutcome {
    pub fn into_parts(self) -> (GenerationResult, Vec<String>) {
        match self {
            ParseOutcome::Clean(result) => (result, Vec::new()),
            ParseOutcome::Recovered(result, warnings) => (result, warnings),
        }
    }
}

// Lenient mirror of the wire shape: everything optional, so a partially
// filled response still decodes and can be repaired field by field.
#[derive(Debug, Default, Deserialize)]
struct RawResult {
    #[serde(default)]
    captions: Vec<RawCaption>,
    #[serde(default)]
    hashtag_sets: Vec<RawHashtagSet>,
    #[serde(default)]
    posting_time: Option<RawPostingTime>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCaption {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    tone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHashtagSet {
    #[serde(default)]
    hashtags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPostingTime {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    day: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub fn parse(raw: &str) -> Result<ParseOutcome, ServiceError> {
    let stripped = strip_code_fences(raw);

    let decoded: RawResult = match serde_json::from_str(stripped) {
        Ok(decoded) => decoded,
        Err(first_err) => {
            let object = extract_json_object(stripped).ok_or_else(|| {
                ServiceError::MalformedResponse(format!(
                    "no JSON object found in model output: {first_err}"
                ))
            })?;
            serde_json::from_str(object).map_err(|err| {
                ServiceError::MalformedResponse(format!("model output did not decode: {err}"))
            })?
        }
    };

    let mut warnings = Vec::new();
    let result = repair(decoded, &mut warnings);

    if warnings.is_empty() {
        Ok(ParseOutcome::Clean(result))
    } else {
        Ok(ParseOutcome::Recovered(result, warnings))
    }
}

/// Remove a surrounding markdown code fence, optionally tagged `json`.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = rest.strip_prefix("json").unwrap_or(rest);
    let inner = inner.find("```").map_or(inner, |end| &inner[..end]);
    inner.trim()
}

/// Find the first balanced `{...}` object, skipping braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn repair(raw: RawResult, warnings: &mut Vec<String>) -> GenerationResult {
    let captions = repair_captions(raw.captions, warnings);
    let hashtag_sets = repair_hashtag_sets(raw.hashtag_sets, warnings);
    let posting_time = repair_posting_time(raw.posting_time, warnings);

    let content_type = match raw.content_type.filter(|value| !value.trim().is_empty()) {
        Some(value) => value,
        None => {
            warnings.push("content_type missing, defaulted to General".to_string());
            "General".to_string()
        }
    };

    GenerationResult {
        captions,
        hashtag_sets,
        posting_time,
        content_type,
    }
}

fn repair_captions(raw: Vec<RawCaption>, warnings: &mut Vec<String>) -> Vec<Caption> {
    if raw.len() > EXPECTED_COUNT {
        warnings.push(format!(
            "model returned {} captions, truncated to {}",
            raw.len(),
            EXPECTED_COUNT
        ));
    }

    let mut captions: Vec<Caption> = Vec::with_capacity(EXPECTED_COUNT);

    for (idx, entry) in raw.into_iter().take(EXPECTED_COUNT).enumerate() {
        let caption = match entry.caption.filter(|text| !text.trim().is_empty()) {
            Some(text) => text,
            None => {
                warnings.push(format!("caption {} had no text, substituted", idx + 1));
                placeholder_caption_text(idx)
            }
        };
        let tone = entry
            .tone
            .filter(|tone| !tone.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_TONES[idx % FALLBACK_TONES.len()].to_string());
        captions.push(Caption { caption, tone });
    }

    if captions.len() < EXPECTED_COUNT {
        warnings.push(format!(
            "model returned {} caption(s), padded to {}",
            captions.len(),
            EXPECTED_COUNT
        ));
        while captions.len() < EXPECTED_COUNT {
            let idx = captions.len();
            captions.push(Caption {
                caption: placeholder_caption_text(idx),
                tone: FALLBACK_TONES[idx % FALLBACK_TONES.len()].to_string(),
            });
        }
    }

    captions
}

fn placeholder_caption_text(idx: usize) -> String {
    format!(
        "(placeholder) Caption suggestion {} was not generated, try again",
        idx + 1
    )
}

fn repair_hashtag_sets(raw: Vec<RawHashtagSet>, warnings: &mut Vec<String>) -> Vec<HashtagSet> {
    if raw.len() > EXPECTED_COUNT {
        warnings.push(format!(
            "model returned {} hashtag sets, truncated to {}",
            raw.len(),
            EXPECTED_COUNT
        ));
    }

    let mut sets: Vec<HashtagSet> = Vec::with_capacity(EXPECTED_COUNT);

    for (idx, entry) in raw.into_iter().take(EXPECTED_COUNT).enumerate() {
        let mut hashtags: Vec<String> = entry
            .hashtags
            .into_iter()
            .filter(|tag| !tag.trim().is_empty())
            .collect();
        if hashtags.is_empty() {
            warnings.push(format!("hashtag set {} was empty, substituted", idx + 1));
            hashtags = FALLBACK_HASHTAGS.iter().map(|tag| tag.to_string()).collect();
        }
        let category = entry
            .category
            .filter(|category| !category.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_CATEGORIES[idx % FALLBACK_CATEGORIES.len()].to_string());
        sets.push(HashtagSet { hashtags, category });
    }

    if sets.len() < EXPECTED_COUNT {
        warnings.push(format!(
            "model returned {} hashtag set(s), padded to {}",
            sets.len(),
            EXPECTED_COUNT
        ));
        while sets.len() < EXPECTED_COUNT {
            let idx = sets.len();
            sets.push(HashtagSet {
                hashtags: FALLBACK_HASHTAGS.iter().map(|tag| tag.to_string()).collect(),
                category: format!(
                    "(placeholder) {}",
                    FALLBACK_CATEGORIES[idx % FALLBACK_CATEGORIES.len()]
                ),
            });
        }
    }

    sets
}

fn repair_posting_time(raw: Option<RawPostingTime>, warnings: &mut Vec<String>) -> PostingTime {
    let raw = raw.unwrap_or_default();
    let missing = raw.time.is_none() && raw.day.is_none() && raw.reason.is_none();
    if missing {
        warnings.push("posting_time missing, defaulted".to_string());
    }
    PostingTime {
        time: raw
            .time
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "Anytime".to_string()),
        day: raw
            .day
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "Any day".to_string()),
        reason: raw.reason.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| {
            "No specific recommendation was generated, post whenever your audience is active"
                .to_string()
        }),
    }
}
