use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub mod schema {
    diesel::table! {
        users (id) {
            id -> Uuid,
            email -> Text,
            username -> Text,
            full_name -> Text,
            role -> Text,
            is_active -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        courses (id) {
            id -> Uuid,
            title -> Text,
            slug -> Text,
            description -> Nullable<Text>,
            price -> Numeric,
            currency -> Text,
            is_free -> Bool,
            level -> Text,
            category -> Nullable<Text>,
            is_published -> Bool,
            instructor_id -> Nullable<Uuid>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        lessons (id) {
            id -> Uuid,
            course_id -> Uuid,
            title -> Text,
            description -> Nullable<Text>,
            lesson_order -> Int4,
            content_type -> Text,
            content_url -> Nullable<Text>,
            duration_minutes -> Nullable<Int4>,
            is_published -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        quizzes (id) {
            id -> Uuid,
            course_id -> Uuid,
            title -> Text,
            description -> Nullable<Text>,
            passing_score -> Float8,
            time_limit_minutes -> Nullable<Int4>,
            is_published -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        questions (id) {
            id -> Uuid,
            quiz_id -> Uuid,
            question_text -> Text,
            question_type -> Text,
            correct_answer -> Text,
            explanation -> Nullable<Text>,
            question_order -> Int4,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        lesson_progress (id) {
            id -> Uuid,
            user_id -> Uuid,
            lesson_id -> Uuid,
            completed -> Bool,
            progress_percent -> Float8,
            last_accessed -> Timestamptz,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        quiz_attempts (id) {
            id -> Uuid,
            quiz_id -> Uuid,
            user_id -> Uuid,
            score -> Float8,
            passed -> Bool,
            started_at -> Timestamptz,
            completed_at -> Nullable<Timestamptz>,
        }
    }

    diesel::table! {
        question_responses (id) {
            id -> Uuid,
            attempt_id -> Uuid,
            question_id -> Uuid,
            student_answer -> Text,
            is_correct -> Nullable<Bool>,
            points_earned -> Float8,
        }
    }

    diesel::table! {
        enrollments (user_id, course_id) {
            user_id -> Uuid,
            course_id -> Uuid,
            enrolled_at -> Timestamptz,
            progress -> Float8,
        }
    }

    diesel::table! {
        payments (id) {
            id -> Uuid,
            user_id -> Uuid,
            course_id -> Uuid,
            amount -> Numeric,
            currency -> Text,
            provider -> Text,
            transaction_id -> Text,
            reference -> Text,
            status -> Text,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        certificates (id) {
            id -> Uuid,
            user_id -> Uuid,
            course_id -> Uuid,
            certificate_number -> Text,
            issue_date -> Timestamptz,
            pdf_url -> Nullable<Text>,
            created_at -> Timestamptz,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(
        users,
        courses,
        lessons,
        quizzes,
        questions,
        lesson_progress,
        quiz_attempts,
        question_responses,
        enrollments,
        payments,
        certificates,
    );
}

pub use schema::*;
