//! System prompts for VLM-based field extraction.
//!
//! The prompt is generated from the configured field list so the model is
//! told exactly which JSON keys to return. Callers can override it via
//! [`crate::config::VisionConfig::system_prompt`]; an override must still ask
//! for a single JSON object, because that is what the response parser reads.

/// Build the default system prompt for the given extraction fields.
pub fn system_prompt_for(fields: &[String]) -> String {
    let keys = fields
        .iter()
        .map(|f| format!("  - \"{f}\""))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a precise data-extraction assistant. You will be shown one image.
Read it carefully and extract the requested fields.

Respond with exactly one JSON object and nothing else. Use these keys:
{keys}

Rules:
1. Every key must be present. Use an empty string when the image does not show the value.
2. Values are strings. Transcribe text exactly as it appears; do not translate or summarise.
3. Do not invent values that are not visible in the image.
4. Do not wrap the JSON in code fences and do not add commentary."#
    )
}

/// User turn accompanying the image.
pub const USER_INSTRUCTION: &str = "Extract the fields from this image.";
