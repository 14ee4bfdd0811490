use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::SessionError;
use super::grouping::{CategoryCounts, category_counts};
use super::identity::{ContentFingerprint, QuestionKey, display_id};
use super::locks::{CategoryKey, LockRegistry, LockToggle};
use super::matching::build_matching_sheet;
use super::messages::SessionCommand;
use super::question::{ExamMetadata, MAX_SELECTION_COUNT, Question, QuestionType};
use super::selection::{SelectionReport, select_questions};
use super::shuffle::{self, ShuffleAvailability, ShuffleOutcome};
use crate::generation::GenerationRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Dismissable, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutcome {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<ShuffleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockToggle>,
    /// Lock sets changed and must be persisted.
    #[serde(skip)]
    pub locks_changed: bool,
}

impl CommandOutcome {
    fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub position: usize,
    /// Positional render key, for list diffing only.
    pub display_id: String,
    pub key: QuestionKey,
    pub locked: bool,
    pub group_locked: bool,
    pub editing: bool,
    #[serde(flatten)]
    pub question: Question,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub items: Vec<QuestionView>,
    pub shuffle: ShuffleAvailability,
    pub locked_question_count: usize,
    pub locked_category_count: usize,
    pub editing_count: usize,
    pub pool_size: usize,
    pub pool_categories: CategoryCounts,
    pub metadata: ExamMetadata,
}

/// All state of one exam-editing session: the shared pool, the working set,
/// exam metadata and lock state. Every user action is a method here; derived
/// values are recomputed from the current snapshot on demand.
#[derive(Debug)]
pub struct EditingSession {
    session_id: Uuid,
    pool: Arc<Vec<Question>>,
    working_set: Vec<Question>,
    metadata: ExamMetadata,
    locks: LockRegistry,
}

impl EditingSession {
    /// Starts with the whole pool (minus duplicate content) as working set.
    pub fn new(
        session_id: Uuid,
        pool: Arc<Vec<Question>>,
        metadata: ExamMetadata,
        locks: LockRegistry,
    ) -> Self {
        let mut session = Self {
            session_id,
            working_set: distinct(&pool),
            pool,
            metadata,
            locks,
        };
        session.prune_locks();
        session
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn working_set(&self) -> &[Question] {
        &self.working_set
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Dispatches a command. `Generate` and `RefreshLocks` need I/O and are
    /// handled by the session actor; here they do nothing.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        command: SessionCommand,
        rng: &mut R,
    ) -> Result<CommandOutcome, SessionError> {
        match command {
            SessionCommand::SetSelectionCount {
                question_type,
                category,
                count,
            } => self.set_selection_count(question_type, &category, count),
            SessionCommand::ApplySelection => self.apply_selection(rng),
            SessionCommand::ToggleQuestionLock { key } => self.toggle_question_lock(&key),
            SessionCommand::ToggleCategoryLock {
                question_type,
                category,
            } => self.toggle_category_lock(question_type, &category),
            SessionCommand::ClearLocks => Ok(self.clear_locks()),
            SessionCommand::BeginEdit { key } => self.begin_edit(&key),
            SessionCommand::SaveEdit { key, question } => self.save_edit(&key, question),
            SessionCommand::CancelEdit { key } => self.cancel_edit(&key),
            SessionCommand::AddQuestion { question } => self.add_question(question),
            SessionCommand::RemoveQuestion { key } => self.remove_question(&key),
            SessionCommand::UpdateMetadata { metadata } => Ok(self.update_metadata(metadata)),
            SessionCommand::Shuffle => Ok(self.shuffle(rng)),
            SessionCommand::RefreshLocks | SessionCommand::Generate { .. } => {
                Ok(CommandOutcome::default())
            }
        }
    }

    pub fn set_selection_count(
        &mut self,
        question_type: QuestionType,
        category: &str,
        count: i64,
    ) -> Result<CommandOutcome, SessionError> {
        if count > i64::from(MAX_SELECTION_COUNT) {
            return Err(SessionError::SelectionCountTooLarge {
                requested: count,
                max: MAX_SELECTION_COUNT,
            });
        }
        self.metadata
            .selection_settings
            .set(question_type, category, count);
        Ok(CommandOutcome::default())
    }

    pub fn apply_selection<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<CommandOutcome, SessionError> {
        let selection = select_questions(&self.pool, &self.metadata.selection_settings, rng)?;
        self.working_set = selection.working_set;
        let pruned = self.prune_locks();

        let mut outcome = CommandOutcome {
            locks_changed: pruned,
            ..CommandOutcome::default()
        };

        for draw in selection.report.capped() {
            outcome.notices.push(Notice::info(format!(
                "Only {} of {} requested '{}' {} questions were available.",
                draw.selected, draw.requested, draw.category, draw.question_type
            )));
        }
        let fakes = &selection.report.fake_answers;
        if fakes.has_shortfall() {
            outcome.notices.push(Notice::warning(format!(
                "Only {} of {} fake answers could be drawn from unused matching questions; {} must be written manually.",
                fakes.drawn, fakes.requested, fakes.manual_placeholders
            )));
        }

        tracing::info!(
            session.id = %self.session_id,
            selection.total = self.working_set.len(),
            selection.fake_answers = fakes.drawn + fakes.manual_placeholders,
            "Applied selection settings"
        );

        outcome.selection = Some(selection.report);
        Ok(outcome)
    }

    pub fn toggle_question_lock(&mut self, key: &QuestionKey) -> Result<CommandOutcome, SessionError> {
        self.position_of(key)?;
        let toggle = self.locks.toggle_question_lock(key);
        let mut outcome = CommandOutcome {
            lock: Some(toggle),
            locks_changed: true,
            ..CommandOutcome::default()
        };
        if toggle.cancelled_edit {
            outcome
                .notices
                .push(Notice::info("Unsaved changes were discarded because the question was locked."));
        }
        Ok(outcome)
    }

    pub fn toggle_category_lock(
        &mut self,
        question_type: QuestionType,
        category: &str,
    ) -> Result<CommandOutcome, SessionError> {
        if question_type != QuestionType::FakeAnswer {
            return Err(SessionError::CategoryLockNotSupported(question_type));
        }
        let key = CategoryKey::new(question_type, category);
        if !self
            .working_set
            .iter()
            .any(|question| CategoryKey::of(question) == key)
        {
            return Err(SessionError::UnknownCategory {
                question_type,
                category: key.category,
            });
        }

        let toggle = self.locks.toggle_category_lock(&key, &self.working_set);
        let mut outcome = CommandOutcome {
            lock: Some(toggle),
            locks_changed: true,
            ..CommandOutcome::default()
        };
        if toggle.cancelled_edit {
            outcome
                .notices
                .push(Notice::info("Unsaved changes were discarded because the group was locked."));
        }
        Ok(outcome)
    }

    pub fn clear_locks(&mut self) -> CommandOutcome {
        let cleared = self.locks.clear_all();
        let outcome = CommandOutcome {
            locks_changed: true,
            ..CommandOutcome::default()
        };
        if cleared.is_empty() {
            return outcome;
        }
        outcome.with_notice(Notice::info(format!(
            "Cleared {} question locks and {} group locks.",
            cleared.questions, cleared.categories
        )))
    }

    pub fn begin_edit(&mut self, key: &QuestionKey) -> Result<CommandOutcome, SessionError> {
        let position = self.position_of(key)?;
        if !self.locks.begin_edit(&self.working_set[position]) {
            return Err(SessionError::QuestionLocked(key.clone()));
        }
        Ok(CommandOutcome::default())
    }

    pub fn save_edit(
        &mut self,
        key: &QuestionKey,
        edited: Question,
    ) -> Result<CommandOutcome, SessionError> {
        let position = self.position_of(key)?;
        if self.locks.is_locked(&self.working_set[position]) {
            self.locks.finish_edit(key);
            return Err(SessionError::QuestionLocked(key.clone()));
        }
        if !self.locks.is_editing(key) {
            return Err(SessionError::NotEditing(key.clone()));
        }

        let fingerprint = ContentFingerprint::of(&edited);
        let duplicates_other = self
            .working_set
            .iter()
            .enumerate()
            .any(|(i, question)| i != position && ContentFingerprint::of(question) == fingerprint);
        if duplicates_other {
            return Err(SessionError::DuplicateContent);
        }

        self.locks.finish_edit(key);
        self.working_set[position] = edited;
        let pruned = self.prune_locks();
        Ok(CommandOutcome {
            locks_changed: pruned,
            ..CommandOutcome::default()
        })
    }

    pub fn cancel_edit(&mut self, key: &QuestionKey) -> Result<CommandOutcome, SessionError> {
        if !self.locks.finish_edit(key) {
            return Err(SessionError::NotEditing(key.clone()));
        }
        Ok(CommandOutcome::default())
    }

    pub fn add_question(&mut self, question: Question) -> Result<CommandOutcome, SessionError> {
        let fingerprint = ContentFingerprint::of(&question);
        if self
            .working_set
            .iter()
            .any(|existing| ContentFingerprint::of(existing) == fingerprint)
        {
            return Err(SessionError::DuplicateContent);
        }
        self.working_set.push(question);
        Ok(CommandOutcome::default())
    }

    pub fn remove_question(&mut self, key: &QuestionKey) -> Result<CommandOutcome, SessionError> {
        let position = self.position_of(key)?;
        if self.locks.is_locked(&self.working_set[position]) {
            return Err(SessionError::QuestionLocked(key.clone()));
        }
        self.working_set.remove(position);
        self.locks.finish_edit(key);
        let pruned = self.prune_locks();
        Ok(CommandOutcome {
            locks_changed: pruned,
            ..CommandOutcome::default()
        })
    }

    pub fn update_metadata(&mut self, metadata: ExamMetadata) -> CommandOutcome {
        self.metadata = metadata;
        CommandOutcome::default()
    }

    pub fn shuffle_availability(&self) -> ShuffleAvailability {
        shuffle::availability(&self.working_set, &self.pool, &self.locks)
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> CommandOutcome {
        let availability = self.shuffle_availability();
        if !availability.can_shuffle {
            return CommandOutcome::default().with_notice(Notice::info(availability.rationale));
        }

        let outcome = shuffle::shuffle(&mut self.working_set, &self.pool, &self.locks, rng);
        let pruned = self.prune_locks();
        tracing::info!(
            session.id = %self.session_id,
            shuffle.mode = ?outcome.mode,
            shuffle.replaced = outcome.replaced,
            shuffle.moved = outcome.moved,
            "Shuffled unlocked questions"
        );

        CommandOutcome {
            shuffle: Some(outcome),
            locks_changed: pruned,
            ..CommandOutcome::default()
        }
    }

    /// Swaps in lock state read back from the store.
    pub fn reload_locks(&mut self, restored: LockRegistry) {
        self.locks.reload_from(restored);
        for question in &self.working_set {
            if self.locks.is_group_locked(question) {
                self.locks.finish_edit(&QuestionKey::of(question));
            }
        }
        self.prune_locks();
    }

    /// Replaces the pool used for future selections and shuffles. The
    /// working set is left as it is.
    pub fn replace_pool(&mut self, pool: Arc<Vec<Question>>) {
        self.pool = pool;
    }

    /// Clears every lock and builds the request for the generation backend,
    /// so the submitted set contains every visible question.
    pub fn prepare_generation<R: Rng + ?Sized>(
        &mut self,
        selected_template: String,
        selected_word_template: String,
        rng: &mut R,
    ) -> (GenerationRequest, CommandOutcome) {
        let cleared = self.locks.clear_all();
        let mut outcome = CommandOutcome {
            locks_changed: true,
            ..CommandOutcome::default()
        };
        if !cleared.is_empty() {
            outcome.notices.push(Notice::info(format!(
                "All locks were cleared before generating the exam ({} questions, {} groups).",
                cleared.questions, cleared.categories
            )));
        }

        let sheet = build_matching_sheet(&self.working_set, rng);
        let request = GenerationRequest {
            questions: self.working_set.clone(),
            metadata: self.metadata.clone(),
            session_id: self.session_id.to_string(),
            selected_template,
            selected_word_template,
            shuffled_matching_order: (!sheet.is_empty()).then_some(sheet),
        };
        (request, outcome)
    }

    pub fn view(&self) -> SessionView {
        let items = self
            .working_set
            .iter()
            .enumerate()
            .map(|(position, question)| {
                let key = QuestionKey::of(question);
                QuestionView {
                    position,
                    display_id: display_id(question, position),
                    locked: self.locks.is_question_locked(&key),
                    group_locked: self.locks.is_group_locked(question),
                    editing: self.locks.is_editing(&key),
                    key,
                    question: question.clone(),
                }
            })
            .collect();

        SessionView {
            session_id: self.session_id,
            items,
            shuffle: self.shuffle_availability(),
            locked_question_count: self.locks.locked_question_count(),
            locked_category_count: self.locks.locked_category_count(),
            editing_count: self.locks.editing_count(),
            pool_size: self.pool.len(),
            pool_categories: category_counts(&self.pool),
            metadata: self.metadata.clone(),
        }
    }

    fn position_of(&self, key: &QuestionKey) -> Result<usize, SessionError> {
        self.working_set
            .iter()
            .position(|question| QuestionKey::of(question) == *key)
            .ok_or_else(|| SessionError::UnknownQuestion(key.clone()))
    }

    /// Returns whether any lock had to be dropped.
    fn prune_locks(&mut self) -> bool {
        let before = (
            self.locks.locked_question_count(),
            self.locks.locked_category_count(),
        );
        self.locks.retain_present(&self.working_set);
        let after = (
            self.locks.locked_question_count(),
            self.locks.locked_category_count(),
        );
        if before != after {
            tracing::debug!(
                session.id = %self.session_id,
                locks.questions.dropped = before.0 - after.0,
                locks.categories.dropped = before.1 - after.1,
                "Dropped locks of questions no longer in the working set"
            );
        }
        before != after
    }
}

fn distinct(questions: &[Question]) -> Vec<Question> {
    let mut seen = HashSet::new();
    questions
        .iter()
        .filter(|question| seen.insert(ContentFingerprint::of(question)))
        .cloned()
        .collect()
}
