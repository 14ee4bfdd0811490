use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::error::SelectionError;
use super::grouping::index_by_category;
use super::identity::ContentFingerprint;
use super::question::{Answer, Question, QuestionType, SelectionSettings};

/// Prefix of the category given to decoys drawn from a matching category.
pub const FAKE_CATEGORY_PREFIX: &str = "fake answers - ";
/// Category of decoys the instructor still has to write by hand.
pub const MANUAL_FAKE_CATEGORY: &str = "fake answers - manual";
const MANUAL_PLACEHOLDER_PREFIX: &str = "[Manual entry required] Fake answer #";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDraw {
    pub question_type: QuestionType,
    pub category: String,
    pub requested: u32,
    pub available: usize,
    pub selected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeAnswerDraw {
    pub requested: u32,
    pub drawn: usize,
    pub manual_placeholders: usize,
}

impl FakeAnswerDraw {
    pub fn has_shortfall(&self) -> bool {
        self.manual_placeholders > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub draws: Vec<CategoryDraw>,
    pub fake_answers: FakeAnswerDraw,
}

impl SelectionReport {
    pub fn total_selected(&self) -> usize {
        self.draws.iter().map(|draw| draw.selected).sum()
    }

    /// Categories where fewer questions were available than requested.
    pub fn capped(&self) -> impl Iterator<Item = &CategoryDraw> {
        self.draws
            .iter()
            .filter(|draw| draw.selected < draw.requested as usize)
    }
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub working_set: Vec<Question>,
    pub report: SelectionReport,
}

/// Draws a working set from `pool` according to `settings`.
///
/// Each requested `(type, category)` gets `min(requested, available)`
/// distinct questions picked uniformly at random. For the matching type,
/// fake-answer decoys are then drawn from every matching question left
/// unselected; any shortfall becomes manual placeholders.
pub fn select_questions<R: Rng + ?Sized>(
    pool: &[Question],
    settings: &SelectionSettings,
    rng: &mut R,
) -> Result<SelectionOutcome, SelectionError> {
    if settings.total_requested() == 0 {
        return Err(SelectionError::NothingRequested);
    }

    let index = index_by_category(pool);
    let mut selected_positions: HashSet<usize> = HashSet::new();
    let mut taken: HashSet<ContentFingerprint> = HashSet::new();
    let mut working_set = Vec::new();
    let mut report = SelectionReport::default();

    for (question_type, category, requested) in settings.category_entries() {
        let positions = index
            .get(&question_type)
            .and_then(|categories| categories.get(category))
            .cloned()
            .unwrap_or_default();

        let mut shuffled = distinct_positions(pool, &positions);
        let available = shuffled.len();
        shuffled.shuffle(rng);

        let mut selected = 0;
        for position in shuffled {
            if selected >= requested as usize {
                break;
            }
            if taken.insert(ContentFingerprint::of(&pool[position])) {
                selected_positions.insert(position);
                working_set.push(pool[position].clone());
                selected += 1;
            }
        }

        tracing::debug!(
            question.type = %question_type,
            question.category = %category,
            selection.requested = requested,
            selection.available = available,
            selection.selected = selected,
            "Drew category"
        );

        report.draws.push(CategoryDraw {
            question_type,
            category: category.to_string(),
            requested,
            available,
            selected,
        });
    }

    let fake_requested = settings.fake_answer_count();
    if fake_requested > 0 {
        let fakes = draw_fake_answers(pool, &selected_positions, &mut taken, fake_requested, rng);
        report.fake_answers = FakeAnswerDraw {
            requested: fake_requested,
            drawn: fakes.drawn,
            manual_placeholders: fakes.questions.len() - fakes.drawn,
        };
        working_set.extend(fakes.questions);
    }

    Ok(SelectionOutcome {
        working_set,
        report,
    })
}

struct FakeDraw {
    questions: Vec<Question>,
    drawn: usize,
}

fn draw_fake_answers<R: Rng + ?Sized>(
    pool: &[Question],
    selected_positions: &HashSet<usize>,
    taken: &mut HashSet<ContentFingerprint>,
    requested: u32,
    rng: &mut R,
) -> FakeDraw {
    let mut candidates: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(position, question)| {
            question.question_type == QuestionType::Matching
                && !selected_positions.contains(position)
        })
        .map(|(position, _)| position)
        .collect();
    candidates.shuffle(rng);

    let mut questions = Vec::new();
    for position in candidates {
        if questions.len() >= requested as usize {
            break;
        }
        let source = &pool[position];
        if !taken.insert(ContentFingerprint::of(source)) {
            continue;
        }
        let fake = fake_answer_from(source);
        taken.insert(ContentFingerprint::of(&fake));
        questions.push(fake);
    }

    let drawn = questions.len();
    let shortfall = requested as usize - drawn;
    if shortfall > 0 {
        tracing::info!(
            fake_answers.requested = requested,
            fake_answers.drawn = drawn,
            fake_answers.manual = shortfall,
            "Not enough unused matching questions, adding manual placeholders"
        );
    }
    questions.extend((1..=shortfall).map(manual_placeholder));

    FakeDraw { questions, drawn }
}

/// Positions with distinct content, first occurrence wins.
fn distinct_positions(pool: &[Question], positions: &[usize]) -> Vec<usize> {
    let mut seen = HashSet::new();
    positions
        .iter()
        .copied()
        .filter(|&position| seen.insert(ContentFingerprint::of(&pool[position])))
        .collect()
}

/// Turns a matching question into a decoy that remembers its source category.
pub fn fake_answer_from(source: &Question) -> Question {
    let mut fake = source.clone();
    fake.question_type = QuestionType::FakeAnswer;
    fake.category = Some(format!("{}{}", FAKE_CATEGORY_PREFIX, source.category_label()));
    fake
}

pub fn manual_placeholder(number: usize) -> Question {
    Question::new(
        QuestionType::FakeAnswer,
        Some(MANUAL_FAKE_CATEGORY),
        format!("{}{}", MANUAL_PLACEHOLDER_PREFIX, number),
        Answer::default(),
    )
}

/// Placeholders carry a text marker no pool question starts with, so a
/// matching category literally named `manual` still yields traceable decoys.
pub fn is_manual_placeholder(question: &Question) -> bool {
    question.question_type == QuestionType::FakeAnswer
        && question.category_label() == MANUAL_FAKE_CATEGORY
        && question.question.starts_with(MANUAL_PLACEHOLDER_PREFIX)
}

/// Matching category a decoy was drawn from; `None` for manual placeholders
/// and for anything that is not a decoy.
pub fn source_category(question: &Question) -> Option<&str> {
    if question.question_type != QuestionType::FakeAnswer || is_manual_placeholder(question) {
        return None;
    }
    question.category_label().strip_prefix(FAKE_CATEGORY_PREFIX)
}

/// The matching question a decoy was cloned from.
pub fn source_question(fake: &Question) -> Option<Question> {
    let category = source_category(fake)?;
    let mut source = fake.clone();
    source.question_type = QuestionType::Matching;
    source.category = Some(category.to_string());
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::grouping::category_counts;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn q(question_type: QuestionType, category: &str, text: &str) -> Question {
        Question::new(question_type, Some(category), text, Answer::text(format!("ans {text}")))
    }

    fn algebra_geometry_pool() -> Vec<Question> {
        let mut pool = Vec::new();
        for i in 0..5 {
            pool.push(q(QuestionType::MultipleChoice, "algebra", &format!("algebra {i}")));
            pool.push(q(QuestionType::MultipleChoice, "geometry", &format!("geometry {i}")));
        }
        pool
    }

    fn assert_no_duplicates(questions: &[Question]) {
        let fingerprints: HashSet<_> = questions.iter().map(ContentFingerprint::of).collect();
        assert_eq!(fingerprints.len(), questions.len(), "duplicate content in working set");
    }

    #[test]
    fn test_draws_requested_counts_per_category() {
        let pool = algebra_geometry_pool();
        let settings = SelectionSettings::new()
            .with(QuestionType::MultipleChoice, "algebra", 3)
            .with(QuestionType::MultipleChoice, "geometry", 2);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(7)).unwrap();

        let counts = category_counts(&outcome.working_set);
        assert_eq!(counts[&QuestionType::MultipleChoice]["algebra"], 3);
        assert_eq!(counts[&QuestionType::MultipleChoice]["geometry"], 2);
        assert_eq!(outcome.working_set.len(), 5);
        assert!(!counts.contains_key(&QuestionType::FakeAnswer));
        assert_no_duplicates(&outcome.working_set);
        assert_eq!(outcome.report.total_selected(), 5);
    }

    #[test]
    fn test_request_beyond_available_is_capped() {
        let pool = algebra_geometry_pool();
        let settings = SelectionSettings::new()
            .with(QuestionType::MultipleChoice, "algebra", 9)
            .with(QuestionType::TrueFalse, "physics", 2);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(outcome.working_set.len(), 5);
        let capped: Vec<_> = outcome.report.capped().map(|d| d.category.as_str()).collect();
        assert_eq!(capped, vec!["algebra", "physics"]);
    }

    #[test]
    fn test_zero_total_is_rejected() {
        let pool = algebra_geometry_pool();
        let settings = SelectionSettings::new()
            .with(QuestionType::MultipleChoice, "algebra", 0)
            .with(QuestionType::Matching, "fake answers", 3);

        let result = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(SelectionError::NothingRequested)));
    }

    #[test]
    fn test_duplicate_pool_content_is_drawn_once() {
        let mut pool = algebra_geometry_pool();
        pool.push(q(QuestionType::MultipleChoice, "algebra", "algebra 0"));
        let settings = SelectionSettings::new().with(QuestionType::MultipleChoice, "algebra", 10);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(outcome.working_set.len(), 5);
        assert_eq!(outcome.report.draws[0].available, 5);
        assert_no_duplicates(&outcome.working_set);
    }

    #[test]
    fn test_fake_answers_come_from_any_unselected_matching_category() {
        let pool = vec![
            q(QuestionType::Matching, "capitals", "France"),
            q(QuestionType::Matching, "capitals", "Spain"),
            q(QuestionType::Matching, "rivers", "Nile"),
            q(QuestionType::Matching, "rivers", "Amazon"),
        ];
        let settings = SelectionSettings::new()
            .with(QuestionType::Matching, "capitals", 2)
            .with(QuestionType::Matching, "fake answers", 2);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(11)).unwrap();

        let fakes: Vec<_> = outcome
            .working_set
            .iter()
            .filter(|q| q.question_type == QuestionType::FakeAnswer)
            .collect();
        assert_eq!(fakes.len(), 2);
        for fake in fakes {
            assert_eq!(fake.category_label(), "fake answers - rivers");
            assert_eq!(source_category(fake), Some("rivers"));
        }
        assert_eq!(outcome.report.fake_answers.drawn, 2);
        assert!(!outcome.report.fake_answers.has_shortfall());
        assert_no_duplicates(&outcome.working_set);
    }

    #[test]
    fn test_fake_answer_shortfall_becomes_manual_placeholders() {
        let pool = vec![
            q(QuestionType::Matching, "capitals", "France"),
            q(QuestionType::Matching, "capitals", "Spain"),
            q(QuestionType::Matching, "rivers", "Nile"),
        ];
        let settings = SelectionSettings::new()
            .with(QuestionType::Matching, "capitals", 2)
            .with(QuestionType::Matching, "fake answers", 4);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(5)).unwrap();

        let traceable = outcome
            .working_set
            .iter()
            .filter(|q| source_category(q).is_some())
            .count();
        let manual: Vec<_> = outcome
            .working_set
            .iter()
            .filter(|q| is_manual_placeholder(q))
            .collect();
        assert_eq!(traceable, 1);
        assert_eq!(manual.len(), 3);
        assert!(manual.iter().all(|q| q.answer.is_blank()));
        assert!(manual[0].question.starts_with("[Manual entry required]"));
        assert_eq!(
            outcome.report.fake_answers,
            FakeAnswerDraw {
                requested: 4,
                drawn: 1,
                manual_placeholders: 3
            }
        );
        assert_no_duplicates(&outcome.working_set);
    }

    #[test]
    fn test_fake_answer_key_ignored_outside_matching() {
        let pool = algebra_geometry_pool();
        let settings = SelectionSettings::new()
            .with(QuestionType::MultipleChoice, "algebra", 1)
            .with(QuestionType::MultipleChoice, "fake answers", 3);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(outcome.working_set.len(), 1);
        assert_eq!(outcome.report.fake_answers, FakeAnswerDraw::default());
    }

    #[test]
    fn test_same_settings_give_same_shape_with_different_seeds() {
        let pool = algebra_geometry_pool();
        let settings = SelectionSettings::new()
            .with(QuestionType::MultipleChoice, "algebra", 2)
            .with(QuestionType::MultipleChoice, "geometry", 4);

        let first = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(1)).unwrap();
        let second = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(
            category_counts(&first.working_set),
            category_counts(&second.working_set)
        );
    }

    #[test]
    fn test_source_question_restores_matching_question() {
        let original = q(QuestionType::Matching, "capitals", "France");
        let fake = fake_answer_from(&original);
        assert_eq!(source_question(&fake), Some(original));
        assert_eq!(source_question(&manual_placeholder(1)), None);
    }

    #[test]
    fn test_decoys_of_a_category_named_manual_stay_traceable() {
        let pool = vec![
            q(QuestionType::Matching, "manual", "Press the red button"),
            q(QuestionType::Matching, "manual", "Open the valve"),
        ];
        let settings = SelectionSettings::new()
            .with(QuestionType::Matching, "manual", 1)
            .with(QuestionType::Matching, "fake answers", 2);

        let outcome = select_questions(&pool, &settings, &mut StdRng::seed_from_u64(8)).unwrap();
        let decoys: Vec<_> = outcome
            .working_set
            .iter()
            .filter(|q| q.question_type == QuestionType::FakeAnswer)
            .collect();
        assert_eq!(decoys.len(), 2);

        let traceable: Vec<_> = decoys.iter().filter(|q| !is_manual_placeholder(q)).collect();
        assert_eq!(traceable.len(), 1);
        assert_eq!(traceable[0].category_label(), MANUAL_FAKE_CATEGORY);
        assert_eq!(source_category(traceable[0]), Some("manual"));
        let source = source_question(traceable[0]).unwrap();
        assert!(!outcome.working_set.contains(&source));
        assert!(pool.contains(&source));
        assert_eq!(outcome.report.fake_answers.manual_placeholders, 1);
    }
}
