//! Quiz grading engine.
//!
//! Scoring is a pure function over the quiz's questions and the submitted
//! responses; persistence wraps the attempt and its per-question rows in a
//! single transaction so a partially-graded attempt is never visible.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::types::{Question, QuestionType, Quiz};
use crate::notify::{Notification, NotificationDispatcher};
use crate::shared::error::ApiError;
use crate::shared::models::schema::{question_responses, questions, quiz_attempts, quizzes, users};
use crate::shared::models::User;
use crate::shared::state::{AppState, CurrentUser};
use crate::shared::utils::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = quiz_attempts)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub score: f64,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = question_responses)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub student_answer: String,
    pub is_correct: Option<bool>,
    pub points_earned: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSubmit {
    pub question_id: Uuid,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub responses: Vec<ResponseSubmit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedResponse {
    pub question_id: Uuid,
    pub student_answer: String,
    pub is_correct: Option<bool>,
    pub points_earned: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedSubmission {
    pub responses: Vec<GradedResponse>,
    pub score: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResponse {
    pub attempt: QuizAttempt,
    pub responses: Vec<GradedResponse>,
}

/// Scores a submission against the quiz's answer keys.
///
/// Responses that reference an unknown question are dropped, not rejected;
/// when a question is answered more than once only the first response counts.
/// Free-text questions are left for manual grading: zero points, no verdict.
pub fn grade(
    questions: &[Question],
    responses: &[ResponseSubmit],
    passing_score: f64,
) -> GradedSubmission {
    let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    let mut answered: HashSet<Uuid> = HashSet::new();
    let mut graded = Vec::new();
    let mut earned = 0.0_f64;

    for response in responses {
        let Some(question) = by_id.get(&response.question_id) else {
            continue;
        };
        if !answered.insert(question.id) {
            continue;
        }

        let is_correct = match QuestionType::from(question.question_type.as_str()) {
            QuestionType::MultipleChoice => Some(response.answer == question.correct_answer),
            QuestionType::TrueFalse => {
                Some(response.answer.eq_ignore_ascii_case(&question.correct_answer))
            }
            QuestionType::ShortAnswer | QuestionType::Essay => None,
        };

        let points_earned = if is_correct == Some(true) { 1.0 } else { 0.0 };
        earned += points_earned;

        graded.push(GradedResponse {
            question_id: question.id,
            student_answer: response.answer.clone(),
            is_correct,
            points_earned,
        });
    }

    let score = if questions.is_empty() {
        0.0
    } else {
        earned / questions.len() as f64 * 100.0
    };

    GradedSubmission {
        responses: graded,
        score,
        passed: score >= passing_score,
    }
}

pub struct GradingEngine {
    db: DbPool,
    notifier: Arc<NotificationDispatcher>,
}

impl GradingEngine {
    pub fn new(db: DbPool, notifier: Arc<NotificationDispatcher>) -> Self {
        Self { db, notifier }
    }

    pub async fn submit_quiz(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        submission: QuizSubmission,
    ) -> Result<AttemptResponse, ApiError> {
        let mut conn = self.db.get()?;

        let quiz: Quiz = quizzes::table
            .find(quiz_id)
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("quiz"))?;

        let question_rows: Vec<Question> = questions::table
            .filter(questions::quiz_id.eq(quiz_id))
            .order(questions::question_order.asc())
            .load(&mut conn)?;

        let graded = grade(&question_rows, &submission.responses, quiz.passing_score);

        let now = Utc::now();
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id,
            user_id,
            score: graded.score,
            passed: graded.passed,
            started_at: now,
            completed_at: Some(now),
        };

        let response_rows: Vec<QuestionResponse> = graded
            .responses
            .iter()
            .map(|r| QuestionResponse {
                id: Uuid::new_v4(),
                attempt_id: attempt.id,
                question_id: r.question_id,
                student_answer: r.student_answer.clone(),
                is_correct: r.is_correct,
                points_earned: r.points_earned,
            })
            .collect();

        conn.transaction::<_, ApiError, _>(|conn| {
            diesel::insert_into(quiz_attempts::table)
                .values(&attempt)
                .execute(conn)?;
            if !response_rows.is_empty() {
                diesel::insert_into(question_responses::table)
                    .values(&response_rows)
                    .execute(conn)?;
            }
            Ok(())
        })?;

        if let Some(student) = users::table
            .find(user_id)
            .first::<User>(&mut conn)
            .optional()?
        {
            self.notifier.dispatch(Notification::QuizResult {
                email: student.email,
                quiz_title: quiz.title.clone(),
                score: graded.score,
                passed: graded.passed,
            });
        }

        Ok(AttemptResponse {
            attempt,
            responses: graded.responses,
        })
    }

    pub async fn get_attempt(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
    ) -> Result<AttemptResponse, ApiError> {
        let mut conn = self.db.get()?;

        let attempt: QuizAttempt = quiz_attempts::table
            .find(attempt_id)
            .filter(quiz_attempts::quiz_id.eq(quiz_id))
            .filter(quiz_attempts::user_id.eq(user_id))
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("quiz attempt"))?;

        let rows: Vec<QuestionResponse> = question_responses::table
            .filter(question_responses::attempt_id.eq(attempt.id))
            .load(&mut conn)?;

        let responses = rows
            .into_iter()
            .map(|r| GradedResponse {
                question_id: r.question_id,
                student_answer: r.student_answer,
                is_correct: r.is_correct,
                points_earned: r.points_earned,
            })
            .collect();

        Ok(AttemptResponse { attempt, responses })
    }
}

// ----- HTTP handlers -----

pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(quiz_id): Path<Uuid>,
    Json(submission): Json<QuizSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = GradingEngine::new(state.conn.clone(), state.notifier.clone());
    let result = engine.submit_quiz(user_id, quiz_id, submission).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": result })),
    ))
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path((quiz_id, attempt_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = GradingEngine::new(state.conn.clone(), state.notifier.clone());
    let result = engine.get_attempt(user_id, quiz_id, attempt_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": result })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/quizzes/:quiz_id/submit", post(submit_quiz))
        .route(
            "/api/quizzes/:quiz_id/attempts/:attempt_id",
            get(get_attempt),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(ty: QuestionType, correct: &str, order: i32) -> Question {
        Question {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            question_text: format!("Question {order}"),
            question_type: ty.to_string(),
            correct_answer: correct.to_string(),
            explanation: None,
            question_order: order,
            created_at: Utc::now(),
        }
    }

    fn answer(question: &Question, value: &str) -> ResponseSubmit {
        ResponseSubmit {
            question_id: question.id,
            answer: value.to_string(),
        }
    }

    #[test]
    fn test_all_correct_scores_100() {
        let questions = vec![
            question(QuestionType::MultipleChoice, "B", 1),
            question(QuestionType::TrueFalse, "true", 2),
        ];
        let responses = vec![answer(&questions[0], "B"), answer(&questions[1], "True")];

        let graded = grade(&questions, &responses, 100.0);
        assert_eq!(graded.score, 100.0);
        assert!(graded.passed);
    }

    #[test]
    fn test_three_of_four_is_75() {
        let questions: Vec<Question> = (1..=4)
            .map(|i| question(QuestionType::MultipleChoice, "A", i))
            .collect();
        let responses = vec![
            answer(&questions[0], "A"),
            answer(&questions[1], "A"),
            answer(&questions[2], "A"),
            answer(&questions[3], "C"),
        ];

        let graded = grade(&questions, &responses, 60.0);
        assert_eq!(graded.score, 75.0);
        assert!(graded.passed);

        let stricter = grade(&questions, &responses, 80.0);
        assert_eq!(stricter.score, 75.0);
        assert!(!stricter.passed);
    }

    #[test]
    fn test_multiple_choice_is_case_sensitive() {
        let questions = vec![question(QuestionType::MultipleChoice, "Paris", 1)];
        let responses = vec![answer(&questions[0], "paris")];

        let graded = grade(&questions, &responses, 50.0);
        assert_eq!(graded.score, 0.0);
        assert_eq!(graded.responses[0].is_correct, Some(false));
    }

    #[test]
    fn test_true_false_is_case_insensitive() {
        let questions = vec![question(QuestionType::TrueFalse, "True", 1)];
        let responses = vec![answer(&questions[0], "TRUE")];

        let graded = grade(&questions, &responses, 50.0);
        assert_eq!(graded.score, 100.0);
    }

    #[test]
    fn test_free_text_is_never_auto_graded() {
        let questions = vec![
            question(QuestionType::ShortAnswer, "anything", 1),
            question(QuestionType::Essay, "anything", 2),
        ];
        let responses = vec![
            answer(&questions[0], "anything"),
            answer(&questions[1], "anything"),
        ];

        let graded = grade(&questions, &responses, 60.0);
        assert_eq!(graded.score, 0.0);
        assert!(!graded.passed);
        for r in &graded.responses {
            assert_eq!(r.is_correct, None);
            assert_eq!(r.points_earned, 0.0);
        }
    }

    #[test]
    fn test_unknown_question_ids_are_dropped() {
        let questions = vec![question(QuestionType::MultipleChoice, "A", 1)];
        let responses = vec![
            ResponseSubmit {
                question_id: Uuid::new_v4(),
                answer: "A".to_string(),
            },
            answer(&questions[0], "A"),
        ];

        let graded = grade(&questions, &responses, 60.0);
        assert_eq!(graded.responses.len(), 1);
        assert_eq!(graded.score, 100.0);
    }

    #[test]
    fn test_duplicate_responses_first_wins() {
        let questions = vec![
            question(QuestionType::MultipleChoice, "A", 1),
            question(QuestionType::MultipleChoice, "B", 2),
        ];
        let responses = vec![
            answer(&questions[0], "A"),
            answer(&questions[0], "A"),
            answer(&questions[0], "A"),
        ];

        let graded = grade(&questions, &responses, 60.0);
        assert_eq!(graded.responses.len(), 1);
        assert_eq!(graded.score, 50.0);
    }

    #[test]
    fn test_empty_quiz_scores_zero() {
        let graded = grade(&[], &[], 60.0);
        assert_eq!(graded.score, 0.0);
        assert!(!graded.passed);
        assert!(graded.responses.is_empty());
    }

    #[test]
    fn test_zero_passing_score_passes_empty_submission() {
        let questions = vec![question(QuestionType::MultipleChoice, "A", 1)];
        let graded = grade(&questions, &[], 0.0);
        assert_eq!(graded.score, 0.0);
        assert!(graded.passed);
    }

    #[test]
    fn test_unanswered_questions_count_against_score() {
        let questions = vec![
            question(QuestionType::MultipleChoice, "A", 1),
            question(QuestionType::MultipleChoice, "B", 2),
        ];
        let responses = vec![answer(&questions[0], "A")];

        let graded = grade(&questions, &responses, 60.0);
        assert_eq!(graded.score, 50.0);
        assert!(!graded.passed);
    }
}
