use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{PoolConfig, PoolSourceType};
use crate::error::{PoolError, Result as AppResult};
use crate::exam::grouping::{CategoryCounts, category_counts};
use crate::exam::question::{ExamMetadata, Question};

/// Extraction output: either `{ "questions": [...], "metadata": {...} }` or
/// a bare array of questions.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPool {
    Questions(Vec<JsonValue>),
    Document {
        #[serde(default)]
        questions: Vec<JsonValue>,
        #[serde(default)]
        metadata: Option<ExamMetadata>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub questions: Vec<Question>,
    pub metadata: ExamMetadata,
}

pub struct PoolParser;

impl PoolParser {
    /// Rows that fail to parse or have no question text are skipped.
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse(content: &str) -> Result<PoolSnapshot, PoolError> {
        let raw: RawPool = serde_json::from_str(content)
            .map_err(|e| PoolError::Parse(format!("Failed to parse JSON: {}", e)))?;

        let (rows, metadata) = match raw {
            RawPool::Document {
                questions,
                metadata,
            } => (questions, metadata.unwrap_or_default()),
            RawPool::Questions(questions) => (questions, ExamMetadata::default()),
        };

        let row_count = rows.len();
        let questions: Vec<Question> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(row, value)| match serde_json::from_value::<Question>(value) {
                Ok(question) if !question.question.trim().is_empty() => Some(question),
                Ok(_) => {
                    tracing::debug!(pool.row = row, "Skipping question without text");
                    None
                }
                Err(e) => {
                    tracing::warn!(pool.row = row, error = %e, "Skipping malformed question");
                    None
                }
            })
            .collect();

        if questions.len() < row_count {
            tracing::info!(
                pool.rows = row_count,
                pool.questions.count = questions.len(),
                "Dropped unusable pool rows"
            );
        }

        Ok(PoolSnapshot {
            questions,
            metadata,
        })
    }
}

#[tracing::instrument(skip(config), fields(
    pool.source_type = ?config.source_type,
    pool.file_path = ?config.file_path,
    pool.http_url = ?config.http_url
))]
async fn load_pool_from_config(config: &PoolConfig) -> Result<PoolSnapshot, PoolError> {
    let Some(raw_content) = load_raw_content(config).await? else {
        tracing::info!("Pool source type is None. Starting with an empty pool.");
        return Ok(PoolSnapshot::default());
    };
    let snapshot = PoolParser::parse(&raw_content)?;

    tracing::info!(
        pool.questions.count = snapshot.questions.len(),
        pool.subject = %snapshot.metadata.subject,
        "Loaded question pool"
    );
    Ok(snapshot)
}

#[tracing::instrument(skip(config))]
async fn load_raw_content(config: &PoolConfig) -> Result<Option<String>, PoolError> {
    match config.source_type {
        PoolSourceType::File => {
            let file_path = config
                .file_path
                .as_ref()
                .ok_or_else(|| PoolError::Config("File path required for file source".to_string()))?;
            tracing::debug!(file.path = %file_path, "Loading pool from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map(Some)
                .map_err(|e| PoolError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })
        }
        PoolSourceType::Http => {
            let url = config
                .http_url
                .as_ref()
                .ok_or_else(|| PoolError::Config("HTTP URL required for http source".to_string()))?;
            tracing::debug!(http.url = %url, "Fetching pool from URL");
            let response = reqwest::get(url)
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| PoolError::HttpFetch {
                    url: url.clone(),
                    source: e,
                })?;

            response
                .text()
                .await
                .map(Some)
                .map_err(|e| PoolError::HttpFetch {
                    url: url.clone(),
                    source: e,
                })
        }
        PoolSourceType::None => Ok(None),
    }
}

/// Shared, read-only question pool. Sessions hold the `Arc` they were given;
/// a refresh swaps in a new one.
pub struct QuestionPoolCache {
    questions: RwLock<Arc<Vec<Question>>>,
    metadata: RwLock<Arc<ExamMetadata>>,
    pool_config: PoolConfig,
}

impl QuestionPoolCache {
    #[tracing::instrument(skip(config), fields(pool.source_type = ?config.source_type))]
    pub async fn new(config: PoolConfig) -> AppResult<Self> {
        let initial = load_pool_from_config(&config).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to load question pool");
            err
        })?;

        Ok(Self::from_snapshot(initial, config))
    }

    pub fn from_snapshot(snapshot: PoolSnapshot, config: PoolConfig) -> Self {
        Self {
            questions: RwLock::new(Arc::new(snapshot.questions)),
            metadata: RwLock::new(Arc::new(snapshot.metadata)),
            pool_config: config,
        }
    }

    /// Reloads from the configured source. On failure the cached pool stays.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> AppResult<Arc<Vec<Question>>> {
        tracing::info!("Refreshing question pool");
        let snapshot = load_pool_from_config(&self.pool_config).await?;
        let questions = Arc::new(snapshot.questions);

        *self.questions.write().await = questions.clone();
        *self.metadata.write().await = Arc::new(snapshot.metadata);

        tracing::info!(
            pool.questions.count = questions.len(),
            "Refreshed question pool"
        );
        Ok(questions)
    }

    pub async fn questions(&self) -> Arc<Vec<Question>> {
        self.questions.read().await.clone()
    }

    pub async fn metadata(&self) -> Arc<ExamMetadata> {
        self.metadata.read().await.clone()
    }

    pub async fn category_counts(&self) -> CategoryCounts {
        category_counts(&self.questions.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::question::QuestionType;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
  "questions": [
    {"type": "multiple choice", "category": "Algebra", "question": "2+2?", "answer": "b", "a": "3", "b": "4"},
    {"type": "matching", "category": "Capitals", "question": "France", "answer": ["Paris"]},
    {"type": "true/false", "question": "  ", "answer": "True"},
    {"type": "crossword", "question": "Across 1"},
    {"type": "written question", "question": "Define entropy", "answer": null, "is_long": "true"}
  ],
  "metadata": {"subject": "General", "year": 2024, "room": "B12"}
}"#;

    fn file_config(path: &std::path::Path) -> PoolConfig {
        PoolConfig {
            source_type: PoolSourceType::File,
            file_path: Some(path.display().to_string()),
            http_url: None,
        }
    }

    #[test]
    fn test_parse_document_skips_unusable_rows() {
        let snapshot = PoolParser::parse(DOCUMENT).unwrap();

        assert_eq!(snapshot.questions.len(), 3);
        assert_eq!(snapshot.questions[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(snapshot.questions[1].answer.display_text(), "Paris");
        assert!(snapshot.questions[2].is_long);
        assert_eq!(snapshot.metadata.subject, "General");
        assert_eq!(snapshot.metadata.department, "AU");
        assert_eq!(snapshot.metadata.extra["room"], "B12");
    }

    #[test]
    fn test_parse_bare_array() {
        let snapshot =
            PoolParser::parse(r#"[{"type": "tf", "question": "Sky is blue", "answer": "True"}]"#)
                .unwrap();
        assert_eq!(snapshot.questions.len(), 1);
        assert_eq!(snapshot.metadata.exam_type, "Midterm");
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            PoolParser::parse("not json"),
            Err(PoolError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_loads_and_refreshes_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let cache = QuestionPoolCache::new(file_config(file.path())).await.unwrap();

        let before = cache.questions().await;
        assert_eq!(before.len(), 3);
        let counts = cache.category_counts().await;
        assert_eq!(counts[&QuestionType::Matching]["Capitals"], 1);

        std::fs::write(
            file.path(),
            r#"[{"type": "matching", "category": "Rivers", "question": "Nile", "answer": "Egypt"}]"#,
        )
        .unwrap();
        let refreshed = cache.refresh().await.unwrap();

        assert_eq!(refreshed.len(), 1);
        assert_eq!(cache.questions().await.len(), 1);
        assert_eq!(before.len(), 3);
        assert_eq!(cache.metadata().await.subject, "");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cached_pool() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let cache = QuestionPoolCache::new(file_config(file.path())).await.unwrap();

        std::fs::write(file.path(), "{ broken").unwrap();
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.questions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_none_source_gives_empty_pool() {
        let cache = QuestionPoolCache::new(PoolConfig {
            source_type: PoolSourceType::None,
            file_path: None,
            http_url: None,
        })
        .await
        .unwrap();
        assert!(cache.questions().await.is_empty());
    }
}
