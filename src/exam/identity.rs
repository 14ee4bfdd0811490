//! Content-derived identity for questions.
//!
//! Questions carry no server-issued key, so identity is computed from their
//! fields. Three values come out of a question:
//!
//! * [`ContentFingerprint`]: the ordered field concatenation, used only for
//!   "is this content already present" checks.
//! * [`QuestionKey`]: a fixed-width digest of the fingerprint. Lock state is
//!   keyed by it, so it survives reordering.
//! * [`display_id`]: a positional render key for list diffing. It changes
//!   whenever a question moves and must never be used to key lock state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::question::{Question, QuestionType};

const FIELD_SEPARATOR: char = '\u{1f}';
/// Stands in for absent or blank optional fields.
const ABSENT: &str = "\u{2205}";
const KEY_HEX_LEN: usize = 32;
const DISPLAY_TOKEN_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of(question: &Question) -> Self {
        let mut fields: Vec<String> = Vec::with_capacity(12);
        fields.push(question.question_type.canonical_name().to_string());
        fields.push(question.question.trim().to_string());
        fields.push(question.category_label().to_string());
        fields.push(answer_field(question));
        fields.push(optional_field(question.q_type.as_deref()));
        fields.push(optional_field(question.image.as_deref()));
        fields.push(if question.is_long { "long" } else { "short" }.to_string());

        if question.question_type == QuestionType::MultipleChoice {
            for option in question.options() {
                fields.push(optional_field(option));
            }
        }

        let mut joined = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                joined.push(FIELD_SEPARATOR);
            }
            joined.push_str(field);
        }
        ContentFingerprint(joined)
    }

    /// Length in characters of the concatenated content.
    pub fn content_len(&self) -> usize {
        self.0.chars().count()
    }

    fn digest_hex(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

fn optional_field(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => ABSENT.to_string(),
    }
}

fn answer_field(question: &Question) -> String {
    use super::question::Answer;
    match &question.answer {
        Answer::Text(text) => text.trim().to_string(),
        Answer::Choices(choices) => {
            let trimmed: Vec<&str> = choices.iter().map(|choice| choice.trim()).collect();
            format!("[{}]", trimmed.join(";"))
        }
    }
}

/// Content-only lock key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionKey(String);

impl QuestionKey {
    pub fn of(question: &Question) -> Self {
        Self::from_fingerprint(&ContentFingerprint::of(question))
    }

    pub fn from_fingerprint(fingerprint: &ContentFingerprint) -> Self {
        let mut digest = fingerprint.digest_hex();
        digest.truncate(KEY_HEX_LEN);
        QuestionKey(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for QuestionKey {
    fn from(value: &str) -> Self {
        QuestionKey(value.trim().to_lowercase())
    }
}

/// Positional render key: `q{index}-{token}-{content length}`.
pub fn display_id(question: &Question, index: usize) -> String {
    let fingerprint = ContentFingerprint::of(question);
    let mut token = fingerprint.digest_hex();
    token.truncate(DISPLAY_TOKEN_LEN);
    format!("q{}-{}-{}", index, token, fingerprint.content_len())
}
