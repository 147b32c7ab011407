//! Lesson progress tracking and course completion evaluation.
//!
//! Completion is recomputed from the live rows on every call rather than
//! cached, so it always reflects the latest attempts and progress.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::types::Lesson;
use crate::shared::error::ApiError;
use crate::shared::models::schema::{
    enrollments, lesson_progress, lessons, quiz_attempts, quizzes,
};
use crate::shared::state::{AppState, CurrentUser};
use crate::shared::utils::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = lesson_progress)]
pub struct LessonProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    pub completed: bool,
    pub progress_percent: f64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordProgressRequest {
    pub completed: bool,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseProgressResponse {
    pub course_id: Uuid,
    pub progress: f64,
    pub is_complete: bool,
}

pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Display-only average over a course's lessons; lessons without a progress
/// row count as zero.
pub fn average_progress(total_lessons: usize, progress_sum: f64) -> f64 {
    if total_lessons == 0 {
        0.0
    } else {
        progress_sum / total_lessons as f64
    }
}

/// The completion rule: every lesson completed and every quiz passed at
/// least once. A course with nothing to do is vacuously complete.
pub fn completion_satisfied(
    total_lessons: i64,
    completed_lessons: i64,
    total_quizzes: i64,
    passed_quizzes: i64,
) -> bool {
    completed_lessons >= total_lessons && passed_quizzes >= total_quizzes
}

/// Evaluates completion for one (learner, course) pair against the current
/// store state. Takes a connection so callers can fold it into their own
/// transaction.
pub fn is_complete(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<bool, diesel::result::Error> {
    let lesson_ids: Vec<Uuid> = lessons::table
        .filter(lessons::course_id.eq(course_id))
        .select(lessons::id)
        .load(conn)?;

    // (user_id, lesson_id) is unique, a plain count is already distinct.
    let completed_lessons: i64 = lesson_progress::table
        .filter(lesson_progress::user_id.eq(user_id))
        .filter(lesson_progress::lesson_id.eq_any(&lesson_ids))
        .filter(lesson_progress::completed.eq(true))
        .count()
        .get_result(conn)?;

    let quiz_ids: Vec<Uuid> = quizzes::table
        .filter(quizzes::course_id.eq(course_id))
        .select(quizzes::id)
        .load(conn)?;

    let passed_quizzes: i64 = quiz_attempts::table
        .filter(quiz_attempts::user_id.eq(user_id))
        .filter(quiz_attempts::quiz_id.eq_any(&quiz_ids))
        .filter(quiz_attempts::passed.eq(true))
        .select(diesel::dsl::count_distinct(quiz_attempts::quiz_id))
        .get_result(conn)?;

    Ok(completion_satisfied(
        lesson_ids.len() as i64,
        completed_lessons,
        quiz_ids.len() as i64,
        passed_quizzes,
    ))
}

pub struct ProgressTracker {
    db: DbPool,
}

impl ProgressTracker {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Upserts the single progress row for (learner, lesson). Re-watching a
    /// lesson may lower the reported percent; no monotonicity is enforced.
    pub async fn record_lesson_progress(
        &self,
        user_id: Uuid,
        lesson_id: Uuid,
        completed: bool,
        percent: f64,
    ) -> Result<LessonProgress, ApiError> {
        let mut conn = self.db.get()?;

        let lesson: Lesson = lessons::table
            .find(lesson_id)
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("lesson"))?;

        let percent = clamp_percent(percent);
        let now = Utc::now();
        let row = LessonProgress {
            id: Uuid::new_v4(),
            user_id,
            lesson_id,
            completed,
            progress_percent: percent,
            last_accessed: now,
            created_at: now,
        };

        diesel::insert_into(lesson_progress::table)
            .values(&row)
            .on_conflict((lesson_progress::user_id, lesson_progress::lesson_id))
            .do_update()
            .set((
                lesson_progress::completed.eq(completed),
                lesson_progress::progress_percent.eq(percent),
                lesson_progress::last_accessed.eq(now),
            ))
            .execute(&mut conn)?;

        self.refresh_enrollment_progress(&mut conn, user_id, lesson.course_id)?;

        let stored: LessonProgress = lesson_progress::table
            .filter(lesson_progress::user_id.eq(user_id))
            .filter(lesson_progress::lesson_id.eq(lesson_id))
            .first(&mut conn)?;

        Ok(stored)
    }

    /// Mean lesson progress across the whole course, for display only.
    /// Completion decisions go through [`is_complete`].
    pub async fn course_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<f64, ApiError> {
        let mut conn = self.db.get()?;
        Ok(course_progress_on(&mut conn, user_id, course_id)?)
    }

    fn refresh_enrollment_progress(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<(), ApiError> {
        let progress = course_progress_on(conn, user_id, course_id)?;

        // No enrollment row (e.g. instructor previewing) is fine.
        diesel::update(
            enrollments::table
                .filter(enrollments::user_id.eq(user_id))
                .filter(enrollments::course_id.eq(course_id)),
        )
        .set(enrollments::progress.eq(progress))
        .execute(conn)?;

        Ok(())
    }
}

fn course_progress_on(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<f64, diesel::result::Error> {
    let lesson_ids: Vec<Uuid> = lessons::table
        .filter(lessons::course_id.eq(course_id))
        .select(lessons::id)
        .load(conn)?;

    if lesson_ids.is_empty() {
        return Ok(0.0);
    }

    let tracked: Vec<f64> = lesson_progress::table
        .filter(lesson_progress::user_id.eq(user_id))
        .filter(lesson_progress::lesson_id.eq_any(&lesson_ids))
        .select(lesson_progress::progress_percent)
        .load(conn)?;

    Ok(average_progress(lesson_ids.len(), tracked.iter().sum()))
}

// ----- HTTP handlers -----

pub async fn record_lesson_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(lesson_id): Path<Uuid>,
    Json(req): Json<RecordProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tracker = ProgressTracker::new(state.conn.clone());
    let progress = tracker
        .record_lesson_progress(user_id, lesson_id, req.completed, req.progress_percent)
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "data": progress })))
}

pub async fn get_course_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let tracker = ProgressTracker::new(state.conn.clone());
    let progress = tracker.course_progress(user_id, course_id).await?;

    let mut conn = state.conn.get().map_err(ApiError::from)?;
    let complete = is_complete(&mut conn, user_id, course_id).map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": CourseProgressResponse {
            course_id,
            progress,
            is_complete: complete,
        }
    })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/lessons/:lesson_id/progress", post(record_lesson_progress))
        .route("/api/courses/:course_id/progress", get(get_course_progress))
}
