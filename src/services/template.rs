use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::services::batch::Record;

#[derive(Debug)]
pub enum TemplateError {
    MissingField(String),
    FsError(String),
    ParseError(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::MissingField(name) => write!(f, "Missing field: {}", name),
            TemplateError::FsError(msg) => write!(f, "File system error: {}", msg),
            TemplateError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<std::io::Error> for TemplateError {
    fn from(err: std::io::Error) -> Self {
        TemplateError::FsError(err.to_string())
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(err: serde_json::Error) -> Self {
        TemplateError::ParseError(err.to_string())
    }
}

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid regex pattern"))
}

/// Field names the renderer computes itself; a record never supplies them.
pub const DERIVED_FIELDS: [&str; 3] = ["pronoun", "pronoun_cap", "word_count"];

/// Substitution options. The fallback pronoun applies when the record's
/// gender is absent or unrecognized.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub fallback_pronoun: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            fallback_pronoun: "he".to_string(),
        }
    }
}

/// A named prompt template with its instruction preamble. Persisted as a
/// JSON object with exactly these three keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,
    pub template: String,
    pub system_instruction: String,
}

static DEFAULT_LETTER_TEMPLATE: &str = r#"Create a short, personalized letter of completion for a participant in the "Make Your Own Money" (MYOM) WhatsApp learning journey delivered through CoachMee.

Here is the participant information:
- Name: {name}
- Gender: {gender}
- Completion Date: {completion_date}
- Strengths (identified by participant): {strengths}
- Goals (identified by participant): {goals}
- MYOM Status After Program: {myom_status}
- Learning Impact (participant feedback): {learning_impact}

Your letter should follow this format:

"On {completion_date}, {name} completed 30 income-generating skills conversations with 'CoachMee'. In {pronoun}r first session with CoachMee, {pronoun} introduced {pronoun}mself as someone with strengths in [mention 2-3 strengths from the participant data]. {pronoun_cap} expressed {pronoun}r desire to [mention their primary goal]. The 30 WhatsApp-enabled sessions that followed focused on essential skills for making your own money. CoachMee says it was a pleasure coaching {name} - {pronoun} showed dedication by completing all 30 sessions, and we wish {pronoun}m continued success on {pronoun}r journey to make {pronoun}r own money!"

Make it exactly ONE PARAGRAPH, warm and encouraging."#;

static DEFAULT_LETTER_INSTRUCTION: &str = r#"You are an expert certificate writer for a WhatsApp learning program.
Your task is to create personalized, warm, and authentic completion letters that highlight the participant's journey.

Follow these principles:
1. Use a warm, conversational tone - as if sending a WhatsApp message to a friend
2. Highlight the participant's strengths and goals in a meaningful way
3. Keep the letter to exactly ONE paragraph of appropriate length
4. Use proper pronouns based on the participant's gender
5. Make the letter something the participant would be proud to share"#;

impl Template {
    pub fn new(name: &str, template: &str, system_instruction: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            system_instruction: system_instruction.to_string(),
        }
    }

    /// The built-in MYOM completion-letter workflow.
    pub fn completion_letter() -> Self {
        Self::new("Completion Letter", DEFAULT_LETTER_TEMPLATE, DEFAULT_LETTER_INSTRUCTION)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path)?;
        let template = serde_json::from_str(&content)?;
        Ok(template)
    }

    pub fn save(&self, path: &Path) -> Result<(), TemplateError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Every distinct placeholder in template order.
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        placeholder_regex()
            .captures_iter(&self.template)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Placeholders the record must supply: everything except derived fields.
    pub fn required_fields(&self) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !DERIVED_FIELDS.contains(&name.as_str()))
            .collect()
    }

    /// Substitutes every placeholder with the record's value for that field,
    /// deriving pronoun fields from gender and word_count from length. Fails
    /// with the first placeholder the record cannot satisfy.
    pub fn render(&self, record: &Record, options: &RenderOptions) -> Result<String, TemplateError> {
        let pronoun = derive_pronoun(record.get("gender"), &options.fallback_pronoun);
        let pronoun_cap = capitalize(&pronoun);
        let word_count = derive_word_count(record.get("length")).to_string();

        let resolve = |name: &str| -> Option<String> {
            match name {
                "pronoun" => Some(pronoun.clone()),
                "pronoun_cap" => Some(pronoun_cap.clone()),
                "word_count" => Some(word_count.clone()),
                _ => record.get(name).map(|v| v.to_string()),
            }
        };

        // Reject before substituting anything: a partially filled prompt
        // must never reach the model.
        for name in self.placeholders() {
            if resolve(&name).is_none() {
                return Err(TemplateError::MissingField(name));
            }
        }

        let rendered = placeholder_regex().replace_all(&self.template, |caps: &regex::Captures| {
            resolve(&caps[1]).unwrap_or_default()
        });

        Ok(rendered.into_owned())
    }
}

/// Gender-to-pronoun mapping carried from the source workflow. Matches are
/// case-insensitive; anything unrecognized gets the configured fallback.
fn derive_pronoun(gender: Option<&str>, fallback: &str) -> String {
    match gender.map(|g| g.trim().to_lowercase()).as_deref() {
        Some("female") => "she".to_string(),
        Some("other") => "they".to_string(),
        _ => fallback.to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Length label to approximate word count, from the content edition.
fn derive_word_count(length: Option<&str>) -> u32 {
    match length {
        Some("Very Short") => 20,
        Some("Short") => 50,
        Some("Medium") => 100,
        Some("Long") => 200,
        Some("Very Long") => 300,
        _ => 100,
    }
}
