use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::grouping::{CategoryGroups, group_by_category, members};
use super::identity::ContentFingerprint;
use super::locks::LockRegistry;
use super::question::{Question, QuestionType};
use super::selection::{fake_answer_from, source_category, source_question};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleMode {
    /// Everything is locked.
    NoOp,
    /// A single unlocked question with no alternative.
    Disabled,
    /// A single unlocked question that can be swapped.
    Replace,
    /// Several unlocked questions, none of which can be swapped.
    Reorder,
    /// Several unlocked questions, at least one of which can be swapped.
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleAvailability {
    pub can_shuffle: bool,
    pub mode: ShuffleMode,
    pub rationale: String,
    pub locked_count: usize,
    pub unlocked_count: usize,
    /// Unlocked questions that have at least one eligible replacement.
    pub replaceable_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleOutcome {
    pub mode: ShuffleMode,
    pub replaced: usize,
    pub unchanged: usize,
    pub moved: usize,
}

/// Fingerprints that a replacement must not reuse.
struct Exclusions(HashSet<ContentFingerprint>);

impl Exclusions {
    fn from_working_set(working_set: &[Question]) -> Self {
        let mut exclusions = Exclusions(HashSet::new());
        for question in working_set {
            exclusions.insert(question);
        }
        exclusions
    }

    /// Records a question and, for decoys, the matching question it mirrors.
    fn insert(&mut self, question: &Question) {
        self.0.insert(ContentFingerprint::of(question));
        if let Some(source) = source_question(question) {
            self.0.insert(ContentFingerprint::of(&source));
        }
    }

    fn allows(&self, question: &Question) -> bool {
        if self.0.contains(&ContentFingerprint::of(question)) {
            return false;
        }
        match source_question(question) {
            Some(source) => !self.0.contains(&ContentFingerprint::of(&source)),
            None => true,
        }
    }
}

/// Eligible replacements for one slot: same type and category, content not
/// already excluded. Decoys draw from their source matching category.
fn candidates_for(slot: &Question, groups: &CategoryGroups<'_>, exclusions: &Exclusions) -> Vec<Question> {
    if slot.question_type == QuestionType::FakeAnswer {
        let Some(category) = source_category(slot) else {
            return Vec::new();
        };
        return members(groups, QuestionType::Matching, category)
            .iter()
            .map(|source| fake_answer_from(source))
            .filter(|fake| exclusions.allows(fake))
            .collect();
    }

    members(groups, slot.question_type, slot.category_label())
        .iter()
        .filter(|candidate| exclusions.allows(candidate))
        .map(|candidate| (*candidate).clone())
        .collect()
}

fn unlocked_positions(working_set: &[Question], locks: &LockRegistry) -> Vec<usize> {
    working_set
        .iter()
        .enumerate()
        .filter(|(_, question)| !locks.is_locked(question))
        .map(|(position, _)| position)
        .collect()
}

fn select_mode(unlocked: usize, replaceable: usize) -> ShuffleMode {
    match (unlocked, replaceable > 0) {
        (0, _) => ShuffleMode::NoOp,
        (1, false) => ShuffleMode::Disabled,
        (1, true) => ShuffleMode::Replace,
        (_, false) => ShuffleMode::Reorder,
        (_, true) => ShuffleMode::Fresh,
    }
}

fn rationale(mode: ShuffleMode, unlocked: usize, replaceable: usize) -> String {
    match mode {
        ShuffleMode::NoOp if unlocked == 0 => {
            "All questions are locked. Unlock a question to shuffle it.".to_string()
        }
        ShuffleMode::NoOp => "Nothing to shuffle.".to_string(),
        ShuffleMode::Disabled => {
            "Only one question is unlocked and its category has no unused alternatives.".to_string()
        }
        ShuffleMode::Replace => {
            "The unlocked question will be replaced with another from its category.".to_string()
        }
        ShuffleMode::Reorder => format!(
            "No unused alternatives remain; the {} unlocked questions will be reordered.",
            unlocked
        ),
        ShuffleMode::Fresh if replaceable < unlocked => format!(
            "{} of {} unlocked questions will be replaced; the rest have no unused alternatives.",
            replaceable, unlocked
        ),
        ShuffleMode::Fresh => format!(
            "All {} unlocked questions will be replaced with others from their categories.",
            unlocked
        ),
    }
}

/// Describes what a shuffle would do right now, without doing it.
pub fn availability(
    working_set: &[Question],
    pool: &[Question],
    locks: &LockRegistry,
) -> ShuffleAvailability {
    let groups = group_by_category(pool);
    let exclusions = Exclusions::from_working_set(working_set);
    let unlocked = unlocked_positions(working_set, locks);
    let replaceable = unlocked
        .iter()
        .filter(|&&position| !candidates_for(&working_set[position], &groups, &exclusions).is_empty())
        .count();

    let mode = select_mode(unlocked.len(), replaceable);
    ShuffleAvailability {
        can_shuffle: !matches!(mode, ShuffleMode::NoOp | ShuffleMode::Disabled),
        mode,
        rationale: rationale(mode, unlocked.len(), replaceable),
        locked_count: working_set.len() - unlocked.len(),
        unlocked_count: unlocked.len(),
        replaceable_count: replaceable,
    }
}

/// Replaces or reorders the unlocked part of `working_set` in place.
///
/// Locked questions keep their content and position. Replacements never
/// introduce content already present anywhere in the working set, and two
/// slots are never filled with the same replacement.
pub fn shuffle<R: Rng + ?Sized>(
    working_set: &mut [Question],
    pool: &[Question],
    locks: &LockRegistry,
    rng: &mut R,
) -> ShuffleOutcome {
    let groups = group_by_category(pool);
    let mut exclusions = Exclusions::from_working_set(working_set);
    let unlocked = unlocked_positions(working_set, locks);
    let replaceable = unlocked
        .iter()
        .filter(|&&position| !candidates_for(&working_set[position], &groups, &exclusions).is_empty())
        .count();
    let mode = select_mode(unlocked.len(), replaceable);

    let mut outcome = ShuffleOutcome {
        mode,
        replaced: 0,
        unchanged: unlocked.len(),
        moved: 0,
    };

    match mode {
        ShuffleMode::NoOp | ShuffleMode::Disabled => {}
        ShuffleMode::Replace | ShuffleMode::Fresh => {
            for &position in &unlocked {
                let candidates = candidates_for(&working_set[position], &groups, &exclusions);
                if let Some(replacement) = candidates.choose(rng) {
                    exclusions.insert(replacement);
                    working_set[position] = replacement.clone();
                    outcome.replaced += 1;
                    outcome.unchanged -= 1;
                }
            }
        }
        ShuffleMode::Reorder => {
            let mut reordered: Vec<Question> =
                unlocked.iter().map(|&p| working_set[p].clone()).collect();
            reordered.shuffle(rng);
            for (&slot, question) in unlocked.iter().zip(reordered) {
                if working_set[slot] != question {
                    outcome.moved += 1;
                }
                working_set[slot] = question;
            }
            outcome.unchanged = unlocked.len() - outcome.moved;
        }
    }

    tracing::debug!(
        shuffle.mode = ?outcome.mode,
        shuffle.replaced = outcome.replaced,
        shuffle.moved = outcome.moved,
        shuffle.unchanged = outcome.unchanged,
        "Shuffled working set"
    );

    outcome
}
