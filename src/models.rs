use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::progress::{ProgressBreakdown, WatchTime};
use crate::quiz::QuizProgress;

// --- rows ---

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CourseRow {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ChapterRow {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct LessonRow {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub position: i32,
    pub has_video: bool,
    pub video_vimeo_id: Option<String>,
    pub video_duration_secs: Option<i32>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct QuestionRow {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub position: i32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub time_limit_secs: Option<i32>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CourseProgressRow {
    pub course_id: Uuid,
    pub completed_chapters: Vec<Uuid>,
    pub completed_videos: Vec<String>,
    pub overall_progress: i32,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct OverallProgressRow {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub overall_progress: i32,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct WatchTimeRow {
    pub chapter_id: Uuid,
    pub watch_time: f64,
    pub total_duration: f64,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct QuizProgressRow {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub chapter_id: Uuid,
    pub best_score: i32,
    pub passed: bool,
    pub total_attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
    pub next_attempt_allowed_at: Option<DateTime<Utc>>,
    pub must_rewatch_video: bool,
    pub video_rewatched_at: Option<DateTime<Utc>>,
    pub instructor_approval_required: bool,
    pub instructor_approval_granted: bool,
    pub instructor_approval_granted_at: Option<DateTime<Utc>>,
    pub instructor_approval_granted_by: Option<Uuid>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct QuizAttemptRow {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub chapter_id: Uuid,
    pub seq: i32,
    pub score: i32,
    pub answers: Vec<String>,
    pub attempted_at: DateTime<Utc>,
    pub passed: bool,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EnrollmentRow {
    pub course_id: Uuid,
    pub purchased: bool,
    pub progress: i32,
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EnrolledCourseRow {
    pub course_id: Uuid,
    pub title: String,
    pub purchased: bool,
    pub purchased_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub payment_amount: Option<f64>,
    pub total_chapters: i64,
    pub total_duration: i64,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CompletedCourseRow {
    pub course_id: Uuid,
    pub completed_on: DateTime<Utc>,
    pub certificate_id: Option<Uuid>,
}

// --- requests ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuizReq {
    pub course_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
    pub answers: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteVideoReq {
    pub course_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
    pub vimeo_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WatchTimeReq {
    pub course_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
    pub watch_time: Option<f64>,
    pub total_duration: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressReq {
    pub course_id: Option<Uuid>,
    pub progress: Option<i32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResetProgressReq {
    pub student_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub course_id: Option<Uuid>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgressQuery {
    pub course_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
}

// --- responses ---

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmissionResp {
    pub score: i32,
    pub passed: bool,
    pub correct_answers: usize,
    pub total_questions: usize,
    pub attempts: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchTimeResp {
    pub chapter_id: Uuid,
    pub watch_time: f64,
    pub watch_percentage: i32,
    pub is_completed: bool,
    pub overall_progress: i32,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressResp {
    pub course_id: Uuid,
    pub completed_chapters: Vec<Uuid>,
    pub completed_videos: Vec<String>,
    pub chapter_watch_times: Vec<WatchTime>,
    pub overall_progress: i32,
    pub total_chapters: usize,
    pub total_videos: usize,
    pub total_duration_secs: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub quiz_progress: Vec<QuizProgress>,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizStatusResp {
    pub completed: bool,
    pub attempts: usize,
    pub best_score: i32,
    pub passed: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub total_attempts: usize,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteVideoResp {
    pub chapter_id: Option<Uuid>,
    pub vimeo_id: Option<String>,
    #[serde(flatten)]
    pub breakdown: ProgressBreakdown,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverrideResp {
    pub course_id: Uuid,
    pub progress: i32,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResp {
    pub course_id: Uuid,
    pub completed_on: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResetResp {
    pub removed: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepairResp {
    pub repaired: u64,
}
