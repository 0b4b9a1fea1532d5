use serde_json::Value as JsonValue;

use crate::store::models::{QuizAnswer, QuizQuestion};

/// 1-decimal rounding with exact halves going to the even digit, so `6.25`
/// becomes `6.2` and `0.75` becomes `0.8`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    (10.0 * x).round_ties_even() / 10.0
}

/// Answer equality. Numbers compare by value, so `2.0` matches `2`.
fn answer_matches(given: &JsonValue, expected: &JsonValue) -> bool {
    match (given.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => given == expected,
    }
}

/// Completion percentage for `completed` of `total` lessons, or `None` when
/// the course has no lessons to divide by.
pub fn progress_percent(completed: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(round_off_1_decimal(
        100.0 * (completed as f64) / (total as f64),
    ))
}

/// Rounded mean of the given scores, `None` when there are none.
pub fn mean_score(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: f64 = scores.iter().sum();
    Some(round_off_1_decimal(sum / (scores.len() as f64)))
}

/// Auto-grade a quiz attempt as a 0-100 percentage.
///
/// An answer counts when it names a question of the quiz and equals that
/// question's `correct_answer`. Repeated answers to one question count once.
pub fn grade_answers(questions: &[QuizQuestion], answers: &[QuizAnswer]) -> f64 {
    if questions.is_empty() {
        return 0.0;
    }
    let correct = questions
        .iter()
        .filter(|q| {
            answers
                .iter()
                .any(|a| a.question_id == q.question_id && answer_matches(&a.answer, &q.correct_answer))
        })
        .count();
    round_off_1_decimal(100.0 * (correct as f64) / (questions.len() as f64))
}
