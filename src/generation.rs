use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::exam::matching::MatchingSheet;
use crate::exam::question::{ExamMetadata, Question};

/// Body of `POST {base_url}/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub questions: Vec<Question>,
    pub metadata: ExamMetadata,
    pub session_id: String,
    #[serde(rename = "selectedTemplate")]
    pub selected_template: String,
    #[serde(rename = "selectedWordTemplate")]
    pub selected_word_template: String,
    #[serde(
        rename = "shuffledMatchingOrder",
        skip_serializing_if = "Option::is_none"
    )]
    pub shuffled_matching_order: Option<MatchingSheet>,
}

/// Download links for the rendered exam and its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocuments {
    pub exam_url: String,
    pub key_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    #[serde(alias = "detail", alias = "message")]
    error: String,
}

#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: Option<Url>,
    default_template: String,
    default_word_template: String,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let base_url = match config.base_url.as_deref() {
            Some(raw) => Some(parse_base_url(raw)?),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url,
            default_template: config.default_template.clone(),
            default_word_template: config.default_word_template.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Template names to use when a `Generate` command leaves them out.
    pub fn templates_or_default(
        &self,
        template: Option<String>,
        word_template: Option<String>,
    ) -> (String, String) {
        (
            template.unwrap_or_else(|| self.default_template.clone()),
            word_template.unwrap_or_else(|| self.default_word_template.clone()),
        )
    }

    #[tracing::instrument(skip(self, request), fields(
        session.id = %request.session_id,
        questions.count = request.questions.len()
    ))]
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedDocuments, GenerationError> {
        let base_url = self.base_url.as_ref().ok_or(GenerationError::NotConfigured)?;
        let endpoint = join(base_url, "generate")?;

        tracing::info!(http.url = %endpoint, "Submitting exam for generation");
        let response = self.http.post(endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BackendErrorBody>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            tracing::warn!(http.status = status.as_u16(), error = %message, "Generation backend rejected request");
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let mut documents: GeneratedDocuments = response.json().await?;
        documents.exam_url = join(base_url, &documents.exam_url)?.to_string();
        documents.key_url = join(base_url, &documents.key_url)?.to_string();

        tracing::info!(
            documents.expires_in_minutes = ?documents.expires_in_minutes,
            "Exam documents generated"
        );
        Ok(documents)
    }
}

/// Base URLs are treated as directories so relative paths append to them.
fn parse_base_url(raw: &str) -> Result<Url, GenerationError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).map_err(|_| GenerationError::InvalidUrl(raw.to_string()))
}

/// Resolves `path` against `base`; absolute URLs pass through unchanged.
fn join(base: &Url, path: &str) -> Result<Url, GenerationError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|_| GenerationError::InvalidUrl(path.to_string()))
}
