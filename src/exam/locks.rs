use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::identity::QuestionKey;
use super::question::{Question, QuestionType, UnknownQuestionType, normalize_category};

const CATEGORY_KEY_SEPARATOR: &str = "::";

/// Identifies a whole `(type, category)` group. Only fake-answer groups are
/// locked this way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryKey {
    pub question_type: QuestionType,
    pub category: String,
}

impl CategoryKey {
    pub fn new(question_type: QuestionType, category: &str) -> Self {
        Self {
            question_type,
            category: normalize_category(Some(category)).to_string(),
        }
    }

    pub fn of(question: &Question) -> Self {
        Self::new(question.question_type, question.category_label())
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.question_type.canonical_name(),
            CATEGORY_KEY_SEPARATOR,
            self.category
        )
    }
}

impl FromStr for CategoryKey {
    type Err = UnknownQuestionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (raw_type, category) = s
            .split_once(CATEGORY_KEY_SEPARATOR)
            .ok_or_else(|| UnknownQuestionType(s.to_string()))?;
        Ok(CategoryKey::new(raw_type.parse()?, category))
    }
}

impl Serialize for CategoryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CategoryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedLocks {
    #[serde(default)]
    locked_questions: Vec<QuestionKey>,
    #[serde(default)]
    locked_categories: Vec<CategoryKey>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockToggle {
    pub locked: bool,
    /// The question was being edited and the edit was discarded.
    pub cancelled_edit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearedLocks {
    pub questions: usize,
    pub categories: usize,
    pub edits: usize,
}

impl ClearedLocks {
    pub fn is_empty(&self) -> bool {
        self.questions == 0 && self.categories == 0 && self.edits == 0
    }
}

/// Question-level and category-level lock state plus the set of questions
/// currently open for editing.
///
/// Invariant: a locked question is never in the editing set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRegistry {
    locked_questions: BTreeSet<QuestionKey>,
    locked_categories: BTreeSet<CategoryKey>,
    editing: BTreeSet<QuestionKey>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores persisted lock state. Missing or unreadable data yields an
    /// empty registry.
    pub fn from_blob(blob: Option<&str>) -> Self {
        let Some(raw) = blob.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<PersistedLocks>(raw) {
            Ok(persisted) => {
                tracing::debug!(
                    locks.questions = persisted.locked_questions.len(),
                    locks.categories = persisted.locked_categories.len(),
                    locks.saved_at = ?persisted.saved_at,
                    "Restored persisted lock state"
                );
                Self {
                    locked_questions: persisted.locked_questions.into_iter().collect(),
                    locked_categories: persisted.locked_categories.into_iter().collect(),
                    editing: BTreeSet::new(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    blob.length = raw.len(),
                    "Stored lock state is malformed, starting without locks"
                );
                Self::default()
            }
        }
    }

    /// Serializes both lock sets. Edits are never persisted.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&PersistedLocks {
            locked_questions: self.locked_questions.iter().cloned().collect(),
            locked_categories: self.locked_categories.iter().cloned().collect(),
            saved_at: Some(Utc::now()),
        })
    }

    pub fn toggle_question_lock(&mut self, key: &QuestionKey) -> LockToggle {
        if self.locked_questions.remove(key) {
            return LockToggle {
                locked: false,
                cancelled_edit: false,
            };
        }
        self.locked_questions.insert(key.clone());
        LockToggle {
            locked: true,
            cancelled_edit: self.editing.remove(key),
        }
    }

    /// Flips a group lock. Locking a group closes the open edits of its
    /// `members`.
    pub fn toggle_category_lock<'a>(
        &mut self,
        key: &CategoryKey,
        members: impl IntoIterator<Item = &'a Question>,
    ) -> LockToggle {
        if self.locked_categories.remove(key) {
            return LockToggle {
                locked: false,
                cancelled_edit: false,
            };
        }
        self.locked_categories.insert(key.clone());
        let mut cancelled_edit = false;
        for question in members {
            if CategoryKey::of(question) == *key {
                cancelled_edit |= self.editing.remove(&QuestionKey::of(question));
            }
        }
        LockToggle {
            locked: true,
            cancelled_edit,
        }
    }

    pub fn clear_all(&mut self) -> ClearedLocks {
        let cleared = ClearedLocks {
            questions: self.locked_questions.len(),
            categories: self.locked_categories.len(),
            edits: self.editing.len(),
        };
        self.locked_questions.clear();
        self.locked_categories.clear();
        self.editing.clear();
        cleared
    }

    /// Replaces the persisted part of the state, keeping edits of questions
    /// that are still unlocked.
    pub fn reload_from(&mut self, restored: LockRegistry) {
        self.locked_questions = restored.locked_questions;
        self.locked_categories = restored.locked_categories;
        let locked = &self.locked_questions;
        self.editing.retain(|key| !locked.contains(key));
    }

    pub fn is_question_locked(&self, key: &QuestionKey) -> bool {
        self.locked_questions.contains(key)
    }

    pub fn is_category_locked(&self, key: &CategoryKey) -> bool {
        self.locked_categories.contains(key)
    }

    /// A question is excluded from replacement when it is locked itself, or
    /// when it is a fake answer whose group is locked.
    pub fn is_locked(&self, question: &Question) -> bool {
        self.is_question_locked(&QuestionKey::of(question)) || self.is_group_locked(question)
    }

    pub fn is_group_locked(&self, question: &Question) -> bool {
        question.question_type == QuestionType::FakeAnswer
            && self.is_category_locked(&CategoryKey::of(question))
    }

    /// Opens a question for editing. Locked questions, and decoys of a
    /// locked group, cannot be edited.
    pub fn begin_edit(&mut self, question: &Question) -> bool {
        if self.is_locked(question) {
            return false;
        }
        self.editing.insert(QuestionKey::of(question));
        true
    }

    /// Closes an edit, returning whether one was open.
    pub fn finish_edit(&mut self, key: &QuestionKey) -> bool {
        self.editing.remove(key)
    }

    pub fn is_editing(&self, key: &QuestionKey) -> bool {
        self.editing.contains(key)
    }

    /// Drops locks and edits that refer to questions no longer present.
    /// Returns the number of question locks removed.
    pub fn retain_present<'a>(&mut self, present: impl IntoIterator<Item = &'a Question>) -> usize {
        let mut keys = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for question in present {
            keys.insert(QuestionKey::of(question));
            if question.question_type == QuestionType::FakeAnswer {
                groups.insert(CategoryKey::of(question));
            }
        }

        let before = self.locked_questions.len();
        self.locked_questions.retain(|key| keys.contains(key));
        self.locked_categories.retain(|key| groups.contains(key));
        self.editing.retain(|key| keys.contains(key));
        before - self.locked_questions.len()
    }

    pub fn locked_question_count(&self) -> usize {
        self.locked_questions.len()
    }

    pub fn locked_category_count(&self) -> usize {
        self.locked_categories.len()
    }

    pub fn editing_count(&self) -> usize {
        self.editing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::question::Answer;

    fn question(text: &str) -> Question {
        Question::new(QuestionType::TrueFalse, Some("science"), text, Answer::text("True"))
    }

    fn fake(category: &str) -> Question {
        Question::new(
            QuestionType::FakeAnswer,
            Some(category),
            "Decoy prompt",
            Answer::text("Decoy"),
        )
    }

    #[test]
    fn test_toggle_question_lock_flips_membership() {
        let mut registry = LockRegistry::new();
        let key = QuestionKey::of(&question("Water boils at 100C"));

        let first = registry.toggle_question_lock(&key);
        assert!(first.locked);
        assert!(registry.is_question_locked(&key));

        let second = registry.toggle_question_lock(&key);
        assert!(!second.locked);
        assert!(!registry.is_question_locked(&key));
    }

    #[test]
    fn test_locking_cancels_open_edit() {
        let mut registry = LockRegistry::new();
        let boils = question("Water boils at 100C");
        let key = QuestionKey::of(&boils);

        assert!(registry.begin_edit(&boils));
        let toggle = registry.toggle_question_lock(&key);
        assert!(toggle.cancelled_edit);
        assert!(!registry.is_editing(&key));
        assert!(!registry.begin_edit(&boils));
    }

    #[test]
    fn test_group_lock_closes_and_blocks_decoy_edits() {
        let decoy = fake("fake answers - capitals");
        let other = fake("fake answers - rivers");
        let members = [decoy.clone(), other.clone()];
        let mut registry = LockRegistry::new();
        assert!(registry.begin_edit(&decoy));
        assert!(registry.begin_edit(&other));

        let toggle = registry.toggle_category_lock(&CategoryKey::of(&decoy), &members);
        assert_eq!(
            toggle,
            LockToggle {
                locked: true,
                cancelled_edit: true
            }
        );
        assert!(!registry.is_editing(&QuestionKey::of(&decoy)));
        assert!(registry.is_editing(&QuestionKey::of(&other)));
        assert!(!registry.begin_edit(&decoy));

        let toggle = registry.toggle_category_lock(&CategoryKey::of(&decoy), &members);
        assert!(!toggle.locked);
        assert!(registry.begin_edit(&decoy));
    }

    #[test]
    fn test_category_lock_covers_fake_answer_group_only() {
        let mut registry = LockRegistry::new();
        let group = CategoryKey::new(QuestionType::FakeAnswer, "fake answers - capitals");
        assert!(registry.toggle_category_lock(&group, []).locked);

        assert!(registry.is_locked(&fake("fake answers - capitals")));
        assert!(!registry.is_locked(&fake("fake answers - rivers")));

        let mut matching = fake("fake answers - capitals");
        matching.question_type = QuestionType::Matching;
        assert!(!registry.is_locked(&matching));
    }

    #[test]
    fn test_blob_round_trip_keeps_locks_but_not_edits() {
        let mut registry = LockRegistry::new();
        let locked = QuestionKey::of(&question("Locked"));
        registry.toggle_question_lock(&locked);
        registry.toggle_category_lock(
            &CategoryKey::new(QuestionType::FakeAnswer, "fake answers - manual"),
            [],
        );
        registry.begin_edit(&question("Edited"));

        let blob = registry.to_blob().unwrap();
        let restored = LockRegistry::from_blob(Some(&blob));

        assert!(restored.is_question_locked(&locked));
        assert_eq!(restored.locked_category_count(), 1);
        assert_eq!(restored.editing_count(), 0);
    }

    #[test]
    fn test_corrupt_or_missing_blob_means_no_locks() {
        assert_eq!(LockRegistry::from_blob(None), LockRegistry::new());
        assert_eq!(LockRegistry::from_blob(Some("   ")), LockRegistry::new());
        assert_eq!(LockRegistry::from_blob(Some("{not json")), LockRegistry::new());
        assert_eq!(
            LockRegistry::from_blob(Some(r#"{"locked_categories": ["bogus"]}"#)),
            LockRegistry::new()
        );
    }

    #[test]
    fn test_clear_all_reports_and_empties_everything() {
        let mut registry = LockRegistry::new();
        registry.toggle_question_lock(&QuestionKey::of(&question("One")));
        registry.toggle_question_lock(&QuestionKey::of(&question("Two")));
        registry.begin_edit(&question("Three"));

        let cleared = registry.clear_all();
        assert_eq!(
            cleared,
            ClearedLocks {
                questions: 2,
                categories: 0,
                edits: 1
            }
        );
        assert_eq!(registry, LockRegistry::new());
    }

    #[test]
    fn test_retain_present_drops_orphaned_locks() {
        let kept = question("Kept");
        let gone = question("Gone");
        let mut registry = LockRegistry::new();
        registry.toggle_question_lock(&QuestionKey::of(&kept));
        registry.toggle_question_lock(&QuestionKey::of(&gone));
        registry.toggle_category_lock(&CategoryKey::new(QuestionType::FakeAnswer, "fake answers - x"), []);

        let removed = registry.retain_present([&kept]);
        assert_eq!(removed, 1);
        assert!(registry.is_question_locked(&QuestionKey::of(&kept)));
        assert_eq!(registry.locked_category_count(), 0);
    }

    #[test]
    fn test_reload_cancels_edits_of_newly_locked_questions() {
        let q = question("Shared");
        let key = QuestionKey::of(&q);
        let mut registry = LockRegistry::new();
        registry.begin_edit(&q);

        let mut stored = LockRegistry::new();
        stored.toggle_question_lock(&key);
        registry.reload_from(LockRegistry::from_blob(Some(&stored.to_blob().unwrap())));

        assert!(registry.is_question_locked(&key));
        assert!(!registry.is_editing(&key));
    }
}
