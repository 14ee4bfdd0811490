use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Category label used for questions whose category is missing or blank.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Key under the matching type in [`SelectionSettings`] that holds the
/// requested number of fake-answer decoys.
pub const FAKE_ANSWERS_KEY: &str = "fake answers";

/// Upper bound on any single selection count, decoys included.
pub const MAX_SELECTION_COUNT: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    Matching,
    Written,
    /// Synthetic decoy produced by the selection filter, never by extraction.
    FakeAnswer,
}

impl QuestionType {
    pub fn all() -> Vec<Self> {
        vec![
            QuestionType::MultipleChoice,
            QuestionType::TrueFalse,
            QuestionType::Matching,
            QuestionType::Written,
            QuestionType::FakeAnswer,
        ]
    }

    /// Accepted spellings, compared after stripping case and punctuation.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            QuestionType::MultipleChoice => &["multiplechoice", "mc", "mcq"],
            QuestionType::TrueFalse => &["truefalse", "tf"],
            QuestionType::Matching => &["matching", "match"],
            QuestionType::Written => &["writtenquestion", "written", "shortanswer", "essay"],
            QuestionType::FakeAnswer => &["fakeanswer", "fakeanswers", "fake"],
        }
    }

    /// Spelling used by the extraction pipeline and the generation backend.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple choice",
            QuestionType::TrueFalse => "true/false",
            QuestionType::Matching => "matching",
            QuestionType::Written => "written question",
            QuestionType::FakeAnswer => "fake answer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        QuestionType::all()
            .into_iter()
            .find(|question_type| question_type.aliases().contains(&normalized.as_str()))
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown question type '{0}'")]
pub struct UnknownQuestionType(pub String);

impl FromStr for QuestionType {
    type Err = UnknownQuestionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestionType::parse(s).ok_or_else(|| UnknownQuestionType(s.to_string()))
    }
}

impl Serialize for QuestionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.canonical_name())
    }
}

impl<'de> Deserialize<'de> for QuestionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Expected answer of a question. Matching rows coming out of the extraction
/// pipeline carry a list of choices; everything else is a single text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Text(String),
    Choices(Vec<String>),
}

impl Default for Answer {
    fn default() -> Self {
        Answer::Text(String::new())
    }
}

impl Answer {
    pub fn text(value: impl Into<String>) -> Self {
        Answer::Text(value.into())
    }

    /// Single-line rendering used for matching columns and previews.
    pub fn display_text(&self) -> String {
        match self {
            Answer::Text(text) => text.trim().to_string(),
            Answer::Choices(choices) => choices
                .iter()
                .map(|choice| choice.trim())
                .filter(|choice| !choice.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.display_text().is_empty()
    }
}

impl<'de> Deserialize<'de> for Answer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(match value {
            JsonValue::Null => Answer::default(),
            JsonValue::String(text) => Answer::Text(text),
            JsonValue::Array(items) => Answer::Choices(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        JsonValue::Null => None,
                        JsonValue::String(text) => Some(text),
                        other => Some(other.to_string()),
                    })
                    .collect(),
            ),
            other => Answer::Text(other.to_string()),
        })
    }
}

/// One exam item as produced by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_text")]
    pub question: String,
    #[serde(default)]
    pub answer: Answer,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub a: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub b: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub c: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub d: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub e: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub q_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_bool")]
    pub is_long: bool,
}

impl Question {
    pub fn new(
        question_type: QuestionType,
        category: Option<&str>,
        question: impl Into<String>,
        answer: Answer,
    ) -> Self {
        Self {
            question_type,
            category: category.map(str::to_string),
            question: question.into(),
            answer,
            a: None,
            b: None,
            c: None,
            d: None,
            e: None,
            q_type: None,
            image: None,
            is_long: false,
        }
    }

    /// Normalized category used by every grouping decision.
    pub fn category_label(&self) -> &str {
        normalize_category(self.category.as_deref())
    }

    pub fn options(&self) -> [Option<&str>; 5] {
        [
            self.a.as_deref(),
            self.b.as_deref(),
            self.c.as_deref(),
            self.d.as_deref(),
            self.e.as_deref(),
        ]
    }
}

pub fn normalize_category(category: Option<&str>) -> &str {
    match category.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => UNCATEGORIZED,
    }
}

/// Requested counts per question type and category, plus the special
/// [`FAKE_ANSWERS_KEY`] entry under the matching type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectionSettings(BTreeMap<QuestionType, BTreeMap<String, u32>>);

impl SelectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a count, clamping negatives to zero. Blank categories map to
    /// [`UNCATEGORIZED`].
    pub fn set(&mut self, question_type: QuestionType, category: &str, count: i64) {
        let key = normalize_settings_key(category);
        let clamped = clamp_count(count);
        self.0.entry(question_type).or_default().insert(key, clamped);
    }

    pub fn with(mut self, question_type: QuestionType, category: &str, count: i64) -> Self {
        self.set(question_type, category, count);
        self
    }

    pub fn count(&self, question_type: QuestionType, category: &str) -> u32 {
        self.0
            .get(&question_type)
            .and_then(|categories| categories.get(&normalize_settings_key(category)))
            .copied()
            .unwrap_or(0)
    }

    /// Requested fake-answer decoys. Only meaningful under the matching type.
    pub fn fake_answer_count(&self) -> u32 {
        self.count(QuestionType::Matching, FAKE_ANSWERS_KEY)
    }

    /// Category entries, skipping the fake-answer key and the synthetic type.
    pub fn category_entries(&self) -> impl Iterator<Item = (QuestionType, &str, u32)> {
        self.0
            .iter()
            .filter(|(question_type, _)| **question_type != QuestionType::FakeAnswer)
            .flat_map(|(question_type, categories)| {
                categories
                    .iter()
                    .filter(|(category, _)| category.as_str() != FAKE_ANSWERS_KEY)
                    .map(move |(category, count)| (*question_type, category.as_str(), *count))
            })
    }

    /// Sum of all requested counts, excluding fake answers.
    pub fn total_requested(&self) -> u64 {
        self.category_entries()
            .map(|(_, _, count)| u64::from(count))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|categories| categories.is_empty())
    }
}

impl<'de> Deserialize<'de> for SelectionSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<QuestionType, BTreeMap<String, JsonValue>> =
            Option::deserialize(deserializer)?.unwrap_or_default();

        let mut settings = SelectionSettings::new();
        for (question_type, categories) in raw {
            for (category, value) in categories {
                let count = match &value {
                    JsonValue::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .unwrap_or(0),
                    JsonValue::String(s) => s.trim().parse::<i64>().unwrap_or(0),
                    _ => 0,
                };
                settings.set(question_type, &category, count);
            }
        }
        Ok(settings)
    }
}

fn normalize_settings_key(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.eq_ignore_ascii_case(FAKE_ANSWERS_KEY) {
        FAKE_ANSWERS_KEY.to_string()
    } else {
        normalize_category(Some(trimmed)).to_string()
    }
}

fn clamp_count(count: i64) -> u32 {
    count.clamp(0, i64::from(MAX_SELECTION_COUNT)) as u32
}

fn default_exam_type() -> String {
    "Midterm".to_string()
}

fn default_program_type() -> String {
    "Regular".to_string()
}

fn default_department() -> String {
    "AU".to_string()
}

/// Exam header information extracted alongside the questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
    #[serde(default)]
    pub year: JsonValue,
    #[serde(default)]
    pub date: JsonValue,
    #[serde(default = "default_exam_type", deserialize_with = "deserialize_lenient_text")]
    pub exam_type: String,
    #[serde(default)]
    pub semester: JsonValue,
    #[serde(default, deserialize_with = "deserialize_lenient_text")]
    pub lecturer: String,
    #[serde(default, deserialize_with = "deserialize_lenient_text")]
    pub subject: String,
    #[serde(
        default = "default_program_type",
        deserialize_with = "deserialize_lenient_text"
    )]
    pub program_type: String,
    #[serde(default = "default_department", deserialize_with = "deserialize_lenient_text")]
    pub department: String,
    #[serde(default)]
    pub selection_settings: SelectionSettings,
    /// Anything else the pipeline attached, passed through to generation.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl Default for ExamMetadata {
    fn default() -> Self {
        Self {
            year: JsonValue::Null,
            date: JsonValue::Null,
            exam_type: default_exam_type(),
            semester: JsonValue::Null,
            lecturer: String::new(),
            subject: String::new(),
            program_type: default_program_type(),
            department: default_department(),
            selection_settings: SelectionSettings::new(),
            extra: serde_json::Map::new(),
        }
    }
}

fn deserialize_lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_optional_text(deserializer)?.unwrap_or_default())
}

/// Accepts strings, numbers and booleans; `null` and blank strings become `None`.
fn deserialize_optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Null => None,
        JsonValue::String(s) if s.trim().is_empty() => None,
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    })
}

fn deserialize_lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Bool(b) => b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    })
}
