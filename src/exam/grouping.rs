use std::collections::BTreeMap;

use super::question::{Question, QuestionType};

/// `type -> category -> questions`, questions in source order.
pub type CategoryGroups<'a> = BTreeMap<QuestionType, BTreeMap<String, Vec<&'a Question>>>;

/// Same shape as [`CategoryGroups`], holding positions into the source slice.
pub type CategoryIndex = BTreeMap<QuestionType, BTreeMap<String, Vec<usize>>>;

/// Available question count per type and category.
pub type CategoryCounts = BTreeMap<QuestionType, BTreeMap<String, usize>>;

pub fn index_by_category(questions: &[Question]) -> CategoryIndex {
    let mut index = CategoryIndex::new();
    for (position, question) in questions.iter().enumerate() {
        index
            .entry(question.question_type)
            .or_default()
            .entry(question.category_label().to_string())
            .or_default()
            .push(position);
    }
    index
}

pub fn group_by_category(questions: &[Question]) -> CategoryGroups<'_> {
    index_by_category(questions)
        .into_iter()
        .map(|(question_type, categories)| {
            let categories = categories
                .into_iter()
                .map(|(category, positions)| {
                    let members = positions.into_iter().map(|i| &questions[i]).collect();
                    (category, members)
                })
                .collect();
            (question_type, categories)
        })
        .collect()
}

pub fn category_counts(questions: &[Question]) -> CategoryCounts {
    let mut counts = CategoryCounts::new();
    for question in questions {
        *counts
            .entry(question.question_type)
            .or_default()
            .entry(question.category_label().to_string())
            .or_default() += 1;
    }
    counts
}

/// Members of one `(type, category)` group, empty when the group is absent.
pub fn members<'g, 'a>(
    groups: &'g CategoryGroups<'a>,
    question_type: QuestionType,
    category: &str,
) -> &'g [&'a Question] {
    groups
        .get(&question_type)
        .and_then(|categories| categories.get(category))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
