use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::question::{Question, QuestionType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingAnswer {
    /// 1-based prompt number in column A.
    pub no: usize,
    /// Letter of the correct entry in column B.
    pub ans: String,
}

/// The single matching exercise of an exam: prompts in column A, correct
/// answers mixed with decoys in column B.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingSheet {
    pub column_a: Vec<String>,
    pub column_b: Vec<String>,
    pub answer_key: Vec<MatchingAnswer>,
}

impl MatchingSheet {
    pub fn is_empty(&self) -> bool {
        self.column_a.is_empty()
    }
}

pub fn build_matching_sheet<R: Rng + ?Sized>(working_set: &[Question], rng: &mut R) -> MatchingSheet {
    let prompts: Vec<&Question> = working_set
        .iter()
        .filter(|q| q.question_type == QuestionType::Matching)
        .collect();
    if prompts.is_empty() {
        return MatchingSheet::default();
    }

    // (answer text, prompt it belongs to)
    let mut column_b: Vec<(String, Option<usize>)> = prompts
        .iter()
        .enumerate()
        .map(|(i, q)| (q.answer.display_text(), Some(i)))
        .collect();
    column_b.extend(
        working_set
            .iter()
            .filter(|q| q.question_type == QuestionType::FakeAnswer)
            .map(|q| (q.answer.display_text(), None)),
    );
    column_b.shuffle(rng);

    let mut answer_key: Vec<MatchingAnswer> = column_b
        .iter()
        .enumerate()
        .filter_map(|(row, (_, prompt))| {
            prompt.map(|p| MatchingAnswer {
                no: p + 1,
                ans: column_letter(row),
            })
        })
        .collect();
    answer_key.sort_by_key(|answer| answer.no);

    MatchingSheet {
        column_a: prompts.iter().map(|q| q.question.trim().to_string()).collect(),
        column_b: column_b.into_iter().map(|(text, _)| text).collect(),
        answer_key,
    }
}

/// `0 -> a`, `25 -> z`, `26 -> aa`, spreadsheet style.
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'a' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}
