//! Course catalog: authoring glue for courses, lessons and quizzes.
//!
//! A course exclusively owns its lessons, quizzes and questions; deleting a
//! course removes that subtree in one transaction. Learner-authored rows
//! (attempts, certificates, payments, enrollments, lesson progress) are only
//! referenced by the course and survive its deletion.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use bigdecimal::Zero;
use chrono::Utc;
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::{is_unique_violation, ApiError};
use crate::shared::models::schema::{courses, lessons, questions, quizzes};
use crate::shared::state::{AppState, CurrentUser};
use crate::shared::utils::DbPool;

pub mod types;

pub use types::*;

pub struct CourseCatalog {
    db: DbPool,
}

impl CourseCatalog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create_course(
        &self,
        req: CreateCourseRequest,
        instructor_id: Option<Uuid>,
    ) -> Result<Course, ApiError> {
        let now = Utc::now();
        let price = req.price.unwrap_or_default();
        let course = Course {
            id: Uuid::new_v4(),
            title: req.title,
            slug: req.slug,
            description: req.description,
            is_free: req.is_free.unwrap_or_else(|| price.is_zero()),
            price,
            currency: req.currency.unwrap_or_else(|| "USD".to_string()),
            level: req.level.unwrap_or_else(|| "beginner".to_string()),
            category: req.category,
            is_published: false,
            instructor_id,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.db.get()?;
        diesel::insert_into(courses::table)
            .values(&course)
            .execute(&mut conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::Conflict("course slug")
                } else {
                    e.into()
                }
            })?;

        Ok(course)
    }

    pub async fn course_detail(&self, course_id: Uuid) -> Result<CourseDetailResponse, ApiError> {
        let mut conn = self.db.get()?;

        let course: Course = courses::table
            .find(course_id)
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("course"))?;

        let lesson_rows = lessons::table
            .filter(lessons::course_id.eq(course_id))
            .order(lessons::lesson_order.asc())
            .load::<Lesson>(&mut conn)?;

        let quiz_rows = quizzes::table
            .filter(quizzes::course_id.eq(course_id))
            .order(quizzes::created_at.asc())
            .load::<Quiz>(&mut conn)?;

        Ok(CourseDetailResponse {
            course,
            lessons: lesson_rows,
            quizzes: quiz_rows,
        })
    }

    pub async fn add_lesson(
        &self,
        course_id: Uuid,
        req: CreateLessonRequest,
    ) -> Result<Lesson, ApiError> {
        let mut conn = self.db.get()?;

        courses::table
            .find(course_id)
            .first::<Course>(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("course"))?;

        let max_order: Option<i32> = lessons::table
            .filter(lessons::course_id.eq(course_id))
            .select(diesel::dsl::max(lessons::lesson_order))
            .first(&mut conn)?;

        let now = Utc::now();
        let lesson = Lesson {
            id: Uuid::new_v4(),
            course_id,
            title: req.title,
            description: req.description,
            lesson_order: max_order.unwrap_or(0) + 1,
            content_type: req.content_type.unwrap_or_else(|| "video".to_string()),
            content_url: req.content_url,
            duration_minutes: req.duration_minutes,
            is_published: true,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(lessons::table)
            .values(&lesson)
            .execute(&mut conn)?;

        Ok(lesson)
    }

    /// Creates a quiz together with its questions so a half-defined quiz is
    /// never visible to graders.
    pub async fn create_quiz(
        &self,
        course_id: Uuid,
        req: CreateQuizRequest,
    ) -> Result<Quiz, ApiError> {
        let mut conn = self.db.get()?;

        courses::table
            .find(course_id)
            .first::<Course>(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("course"))?;

        let passing_score = req.passing_score.unwrap_or(60.0).clamp(0.0, 100.0);
        let now = Utc::now();
        let quiz = Quiz {
            id: Uuid::new_v4(),
            course_id,
            title: req.title,
            description: req.description,
            passing_score,
            time_limit_minutes: req.time_limit_minutes,
            is_published: true,
            created_at: now,
            updated_at: now,
        };

        let question_rows: Vec<Question> = req
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Question {
                id: Uuid::new_v4(),
                quiz_id: quiz.id,
                question_text: q.question_text,
                question_type: q.question_type.to_string(),
                correct_answer: q.correct_answer,
                explanation: q.explanation,
                question_order: i as i32 + 1,
                created_at: now,
            })
            .collect();

        conn.transaction::<_, ApiError, _>(|conn| {
            diesel::insert_into(quizzes::table)
                .values(&quiz)
                .execute(conn)?;
            if !question_rows.is_empty() {
                diesel::insert_into(questions::table)
                    .values(&question_rows)
                    .execute(conn)?;
            }
            Ok(())
        })?;

        Ok(quiz)
    }

    pub async fn publish_course(&self, course_id: Uuid) -> Result<Course, ApiError> {
        let mut conn = self.db.get()?;

        let updated = diesel::update(courses::table.find(course_id))
            .set((
                courses::is_published.eq(true),
                courses::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(ApiError::NotFound("course"));
        }

        Ok(courses::table.find(course_id).first(&mut conn)?)
    }

    /// Removes the course and its owned subtree. Learner data is left in
    /// place by design of the schema (no foreign keys from learner tables
    /// into the subtree).
    pub async fn delete_course(&self, course_id: Uuid) -> Result<(), ApiError> {
        let mut conn = self.db.get()?;

        conn.transaction::<_, ApiError, _>(|conn| {
            let quiz_ids: Vec<Uuid> = quizzes::table
                .filter(quizzes::course_id.eq(course_id))
                .select(quizzes::id)
                .load(conn)?;

            diesel::delete(questions::table.filter(questions::quiz_id.eq_any(&quiz_ids)))
                .execute(conn)?;
            diesel::delete(quizzes::table.filter(quizzes::course_id.eq(course_id)))
                .execute(conn)?;
            diesel::delete(lessons::table.filter(lessons::course_id.eq(course_id)))
                .execute(conn)?;
            let deleted =
                diesel::delete(courses::table.find(course_id)).execute(conn)?;

            if deleted == 0 {
                return Err(ApiError::NotFound("course"));
            }
            Ok(())
        })
    }
}

// ----- HTTP handlers -----

pub async fn create_course(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    let course = catalog.create_course(req, Some(user_id)).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": course })),
    ))
}

pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    let detail = catalog.course_detail(course_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": detail })))
}

pub async fn add_lesson(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    let lesson = catalog.add_lesson(course_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": lesson })),
    ))
}

pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    let quiz = catalog.create_quiz(course_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": quiz })),
    ))
}

pub async fn publish_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    let course = catalog.publish_course(course_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": course })))
}

pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = CourseCatalog::new(state.conn.clone());
    catalog.delete_course(course_id).await?;
    Ok(Json(
        serde_json::json!({ "success": true, "message": "Course deleted" }),
    ))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/courses", post(create_course))
        .route(
            "/api/courses/:course_id",
            get(get_course).delete(delete_course),
        )
        .route("/api/courses/:course_id/publish", put(publish_course))
        .route("/api/courses/:course_id/lessons", post(add_lesson))
        .route("/api/courses/:course_id/quizzes", post(create_quiz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_roundtrip() {
        let types = vec![
            QuestionType::MultipleChoice,
            QuestionType::TrueFalse,
            QuestionType::ShortAnswer,
            QuestionType::Essay,
        ];
        for ty in types {
            assert_eq!(QuestionType::from(ty.to_string().as_str()), ty);
        }
    }

    #[test]
    fn test_unknown_question_type_defaults_to_essay() {
        assert_eq!(QuestionType::from("matching"), QuestionType::Essay);
    }

    #[test]
    fn test_question_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&QuestionType::MultipleChoice).unwrap(),
            "\"multiple_choice\""
        );
        let parsed: QuestionType = serde_json::from_str("\"true_false\"").unwrap();
        assert_eq!(parsed, QuestionType::TrueFalse);
    }
}
