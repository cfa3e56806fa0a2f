use chrono::Utc;
use uuid::Uuid;

use super::config::PointsPolicy;
use super::error::{PipelineError, PipelineResult};
use super::types::{AttemptRecord, ItemResult, Quiz};

/// Who submitted an attempt, and within which session if any.
#[derive(Debug, Clone)]
pub struct AttemptContext<'a> {
    pub learner_id: &'a str,
    pub session_id: Option<Uuid>,
}

/// Scores a submission against a quiz. Pure apart from the record id and timestamp.
pub fn score(
    quiz: &Quiz,
    submitted_answers: &[Option<String>],
    ctx: &AttemptContext<'_>,
    policy: &PointsPolicy,
) -> PipelineResult<AttemptRecord> {
    if submitted_answers.len() != quiz.len() {
        return Err(PipelineError::MalformedSubmission {
            expected: quiz.len(),
            actual: submitted_answers.len(),
        });
    }
    if quiz.is_empty() {
        return Err(PipelineError::invalid_input("quiz has no items"));
    }

    let item_results: Vec<ItemResult> = quiz
        .items
        .iter()
        .zip(submitted_answers)
        .map(|(item, answer)| ItemResult {
            topic: item.topic.clone(),
            correct: answer
                .as_deref()
                .is_some_and(|a| answers_match(a, &item.correct_answer)),
        })
        .collect();

    let correct_count = item_results.iter().filter(|r| r.correct).count();
    let total = quiz.len();

    Ok(AttemptRecord {
        id: Uuid::new_v4(),
        quiz_id: quiz.id,
        session_id: ctx.session_id,
        learner_id: ctx.learner_id.to_string(),
        topic: quiz.topic.clone(),
        tier: quiz.tier,
        submitted_answers: submitted_answers.to_vec(),
        item_results,
        correct_count,
        total,
        score: correct_count as f64 / total as f64,
        points_awarded: policy.award(correct_count),
        submitted_at: Utc::now(),
    })
}

/// Case and whitespace insensitive equality. Blank answers never match.
pub fn answers_match(submitted: &str, expected: &str) -> bool {
    let submitted = normalize_answer(submitted);
    !submitted.is_empty() && submitted == normalize_answer(expected)
}

fn normalize_answer(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastery::types::{ContentFingerprint, QuizItem, QuizItemKind, Tier};
    use proptest::prelude::*;

    fn quiz(n: usize) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            fingerprint: ContentFingerprint::from_hex("cd".repeat(32)),
            tier: Tier::Standard,
            topic: "Cells".to_string(),
            items: (0..n)
                .map(|i| QuizItem {
                    question: format!("Q{i}?"),
                    kind: QuizItemKind::MultipleChoice,
                    options: Some(vec!["Mitochondria".into(), "Nucleus".into()]),
                    correct_answer: "Mitochondria".to_string(),
                    topic: "Cells".to_string(),
                    subtopic: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    fn ctx() -> AttemptContext<'static> {
        AttemptContext {
            learner_id: "learner-1",
            session_id: None,
        }
    }

    fn answers(correct: usize, total: usize) -> Vec<Option<String>> {
        (0..total)
            .map(|i| {
                Some(if i < correct { "Mitochondria" } else { "Nucleus" }.to_string())
            })
            .collect()
    }

    #[test]
    fn length_mismatch_is_malformed() {
        let err = score(&quiz(6), &answers(4, 4), &ctx(), &PointsPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            PipelineError::MalformedSubmission {
                expected: 6,
                actual: 4
            }
        );
    }

    #[test]
    fn comparison_ignores_case_and_whitespace() {
        let submitted = vec![
            Some("  mitochondria ".to_string()),
            Some("MITOCHONDRIA".to_string()),
            Some("Nucleus".to_string()),
            None,
            Some("   ".to_string()),
        ];
        let record = score(&quiz(5), &submitted, &ctx(), &PointsPolicy::default()).unwrap();
        assert_eq!(record.correct_count, 2);
        assert_eq!(record.total, 5);
        assert!((record.score - 0.4).abs() < f64::EPSILON);
        assert_eq!(record.points_awarded, 21);
        assert_eq!(record.incorrect_topics().count(), 3);
        assert_eq!(record.learner_id, "learner-1");
    }

    #[test]
    fn blank_expected_never_matches_blank_answer() {
        assert!(!answers_match("", ""));
        assert!(answers_match("Light  energy", "light energy"));
    }

    proptest! {
        #[test]
        fn points_never_decrease_with_more_correct(total in 1usize..12, a in 0usize..12, b in 0usize..12) {
            let (lo, hi) = (a.min(b).min(total), a.max(b).min(total));
            let quiz = quiz(total);
            let policy = PointsPolicy::default();
            let low = score(&quiz, &answers(lo, total), &ctx(), &policy).unwrap();
            let high = score(&quiz, &answers(hi, total), &ctx(), &policy).unwrap();
            prop_assert!(high.points_awarded >= low.points_awarded);
            prop_assert!(high.score >= low.score);
            prop_assert!((0.0..=1.0).contains(&high.score));
        }

        #[test]
        fn scoring_is_deterministic(total in 1usize..12, correct in 0usize..12) {
            let correct = correct.min(total);
            let quiz = quiz(total);
            let policy = PointsPolicy::default();
            let first = score(&quiz, &answers(correct, total), &ctx(), &policy).unwrap();
            let second = score(&quiz, &answers(correct, total), &ctx(), &policy).unwrap();
            prop_assert_eq!(first.item_results, second.item_results);
            prop_assert_eq!(first.points_awarded, second.points_awarded);
        }
    }
}
