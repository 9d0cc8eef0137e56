use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use sqlx::PgConnection;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::auth::UserId;
use crate::course::{self, Course};
use crate::db::Db;
use crate::enrollment::{self, EnrolledCourse, EnrolledCourses, InvestmentStats};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::progress::LessonWatched;
use crate::quiz::{
    self, AttemptEntry, InstructorAnalytics, InstructorStudentProgress, QuizProgress, QuizSummary,
};
use crate::restriction::AttemptCheck;
use crate::store;
use crate::tracker::StudentCourse;

pub fn router(db: Db) -> Router {
    Router::new()
        // course progress
        .route("/progress/complete-video", post(complete_video))
        .route("/progress/watch-time", post(watch_time))
        .route("/progress/course/:course_id", get(course_progress))
        // quizzes
        .route("/quiz-progress/submit", post(submit_quiz))
        .route(
            "/quiz-progress/attempt-allowed/:course_id/:chapter_id",
            get(attempt_allowed),
        )
        .route("/quiz-progress/status/:course_id/:chapter_id", get(quiz_status))
        .route("/quiz-progress/attempts/:course_id", get(course_attempts))
        .route("/quiz-progress/attempts-all", get(all_attempts))
        .route("/quiz-progress/summary", get(quiz_summary))
        .route("/quiz-progress/instructor/analytics", get(instructor_analytics))
        .route(
            "/quiz-progress/instructor/student-progress",
            get(instructor_student_progress),
        )
        .route("/quiz-progress/instructor/reset-progress", post(reset_progress))
        .route("/quiz-progress/repair-attempt-counts", post(repair_attempt_counts))
        // enrollment
        .route("/enrollment/progress", put(update_progress))
        .route("/enrollment/complete/:course_id", put(complete_course))
        .route("/enrollment/enrolled-courses", get(enrolled_courses))
        .route("/enrollment/investment-stats", get(investment_stats))
        .with_state(db)
}

async fn load_course(conn: &mut PgConnection, course_id: Uuid) -> AppResult<Course> {
    course::load(conn, course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))
}

/// Runs one state transition for (student, course) under the student's row
/// lock. Nothing is written unless `apply` succeeds.
async fn mutate<T>(
    db: &Db,
    student_id: Uuid,
    course_id: Uuid,
    apply: impl FnOnce(&Course, &mut StudentCourse, usize) -> AppResult<T>,
) -> AppResult<T> {
    let mut tx = db.begin().await?;
    store::lock_student(&mut *tx, student_id).await?;
    let course = load_course(&mut *tx, course_id).await?;
    let mut state = store::load_student_course(&mut *tx, student_id, course_id).await?;
    let submitted = store::submitted_assignments(&mut *tx, student_id, course_id).await?;

    let out = apply(&course, &mut state, submitted)?;

    store::save_student_course(&mut *tx, &state).await?;
    tx.commit().await?;
    Ok(out)
}

async fn read_state(db: &Db, student_id: Uuid, course_id: Uuid) -> AppResult<StudentCourse> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    Ok(store::load_student_course(&mut *conn, student_id, course_id).await?)
}

// --- course progress ---

async fn complete_video(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    body: Result<Json<CompleteVideoReq>, JsonRejection>,
) -> AppResult<Json<CompleteVideoResp>> {
    let Json(req) = body?;
    let course_id = req
        .course_id
        .ok_or_else(|| AppError::validation("Course ID is required"))?;
    let target = match (req.chapter_id, req.vimeo_id.filter(|v| !v.is_empty())) {
        (Some(chapter_id), _) => LessonWatched::Chapter(chapter_id),
        (None, Some(vimeo_id)) => LessonWatched::Video(vimeo_id),
        (None, None) => {
            return Err(AppError::validation("Chapter ID or video ID is required"));
        }
    };

    let now = Utc::now();
    let breakdown = mutate(&db, student_id, course_id, |course, state, submitted| {
        state.mark_watched(course, &target, submitted, now)
    })
    .await?;

    let (chapter_id, vimeo_id) = match target {
        LessonWatched::Chapter(id) => (Some(id), None),
        LessonWatched::Video(id) => (None, Some(id)),
    };
    Ok(Json(CompleteVideoResp {
        chapter_id,
        vimeo_id,
        breakdown,
    }))
}

async fn watch_time(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    body: Result<Json<WatchTimeReq>, JsonRejection>,
) -> AppResult<Json<WatchTimeResp>> {
    let Json(req) = body?;
    let (Some(course_id), Some(chapter_id), Some(watch_time)) =
        (req.course_id, req.chapter_id, req.watch_time)
    else {
        return Err(AppError::validation(
            "Course ID, chapter ID, and watch time are required",
        ));
    };

    let now = Utc::now();
    let resp = mutate(&db, student_id, course_id, |course, state, submitted| {
        state.record_watch_time(
            course,
            chapter_id,
            watch_time,
            req.total_duration,
            submitted,
            now,
        )
    })
    .await?;
    Ok(Json(resp))
}

async fn course_progress(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<CourseProgressResp>> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    let course = load_course(&mut *conn, course_id).await?;
    let state = store::load_student_course(&mut *conn, student_id, course_id).await?;
    Ok(Json(state.snapshot(&course)))
}

// --- quizzes ---

async fn submit_quiz(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    body: Result<Json<SubmitQuizReq>, JsonRejection>,
) -> AppResult<Json<QuizSubmissionResp>> {
    let Json(req) = body?;
    let (Some(course_id), Some(chapter_id), Some(answers)) =
        (req.course_id, req.chapter_id, req.answers)
    else {
        return Err(AppError::validation(
            "Course ID, chapter ID, and answers are required",
        ));
    };

    let now = Utc::now();
    let resp = mutate(&db, student_id, course_id, |course, state, submitted| {
        state.submit_quiz(course, chapter_id, answers, submitted, now)
    })
    .await?;
    Ok(Json(resp))
}

async fn attempt_allowed(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    Path((course_id, chapter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<AttemptCheck>> {
    let state = read_state(&db, student_id, course_id).await?;
    Ok(Json(state.attempt_check(chapter_id, Utc::now())))
}

async fn quiz_status(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    Path((course_id, chapter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<QuizStatusResp>> {
    let state = read_state(&db, student_id, course_id).await?;
    Ok(Json(state.quiz_status(chapter_id)))
}

async fn course_attempts(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<Vec<QuizProgress>>> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    let progress = store::student_quiz_progress(&mut *conn, student_id, Some(course_id)).await?;
    Ok(Json(progress))
}

async fn all_attempts(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
) -> AppResult<Json<Vec<AttemptEntry>>> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    let progress = store::student_quiz_progress(&mut *conn, student_id, None).await?;

    let mut courses = Vec::new();
    for course_id in store::enrolled_course_ids(&mut *conn, student_id).await? {
        if let Some(c) = course::load(&mut *conn, course_id).await? {
            courses.push(c);
        }
    }
    Ok(Json(quiz::attempt_history(&progress, &courses)))
}

async fn quiz_summary(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
) -> AppResult<Json<QuizSummary>> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    let progress = store::student_quiz_progress(&mut *conn, student_id, None).await?;
    Ok(Json(quiz::summarize(&progress)))
}

async fn instructor_analytics(
    State(db): State<Db>,
    TypedHeader(UserId(instructor_id)): TypedHeader<UserId>,
    Query(query): Query<AnalyticsQuery>,
) -> AppResult<Json<InstructorAnalytics>> {
    let mut conn = db.acquire().await?;
    let ids = store::instructor_course_ids(&mut *conn, instructor_id, query.course_id).await?;
    if query.course_id.is_some() && ids.is_empty() {
        return Err(AppError::not_found("Course not found or access denied"));
    }

    let mut courses = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(c) = course::load(&mut *conn, *id).await? {
            courses.push(c);
        }
    }
    let progress = store::course_quiz_progress(&mut *conn, &ids).await?;
    Ok(Json(quiz::instructor_analytics(
        &courses,
        &progress,
        Utc::now(),
    )))
}

async fn instructor_student_progress(
    State(db): State<Db>,
    TypedHeader(UserId(instructor_id)): TypedHeader<UserId>,
    Query(query): Query<StudentProgressQuery>,
) -> AppResult<Json<InstructorStudentProgress>> {
    let mut conn = db.acquire().await?;
    let ids = store::instructor_course_ids(&mut *conn, instructor_id, query.course_id).await?;
    if query.course_id.is_some() && ids.is_empty() {
        return Err(AppError::not_found("Course not found or access denied"));
    }

    let mut courses = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(c) = course::load(&mut *conn, *id).await? {
            courses.push(c);
        }
    }

    let mut progress = store::course_quiz_progress(&mut *conn, &ids).await?;
    if let Some(student_id) = query.student_id {
        progress.retain(|(s, _)| *s == student_id);
    }
    let student_ids: Vec<Uuid> = progress
        .iter()
        .map(|(s, _)| *s)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let students = store::students(&mut *conn, &student_ids).await?;
    let overall: HashMap<(Uuid, Uuid), i32> = store::overall_progress(&mut *conn, &ids)
        .await?
        .into_iter()
        .map(|r| ((r.student_id, r.course_id), r.overall_progress))
        .collect();

    Ok(Json(quiz::instructor_student_progress(
        &courses,
        &students,
        &progress,
        &overall,
        Utc::now(),
    )))
}

async fn reset_progress(
    State(db): State<Db>,
    TypedHeader(UserId(instructor_id)): TypedHeader<UserId>,
    body: Result<Json<ResetProgressReq>, JsonRejection>,
) -> AppResult<Json<ResetResp>> {
    let Json(req) = body?;
    let (Some(student_id), Some(course_id)) = (req.student_id, req.course_id) else {
        return Err(AppError::validation("Student ID and course ID are required"));
    };

    let mut tx = db.begin().await?;
    let course = course::find_course_row(&mut *tx, course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    if course.instructor_id != instructor_id {
        return Err(AppError::access_denied(
            "Only the course instructor can reset quiz progress",
        ));
    }
    store::lock_student(&mut *tx, student_id).await?;
    let removed =
        store::reset_quiz_progress(&mut *tx, student_id, course_id, req.chapter_id).await?;
    tx.commit().await?;

    tracing::info!(
        %instructor_id,
        %student_id,
        %course_id,
        chapter_id = ?req.chapter_id,
        removed,
        "quiz progress reset"
    );
    Ok(Json(ResetResp { removed }))
}

async fn repair_attempt_counts(
    State(db): State<Db>,
    TypedHeader(UserId(caller)): TypedHeader<UserId>,
    Query(query): Query<AnalyticsQuery>,
) -> AppResult<Json<RepairResp>> {
    let mut conn = db.acquire().await?;
    let taught = store::instructor_course_ids(&mut *conn, caller, query.course_id).await?;
    let scope = store::repair_scope(taught)?;
    let repaired = store::repair_attempt_counts(&mut *conn, &scope).await?;
    tracing::info!(%caller, courses = scope.len(), repaired, "quiz attempt counts repaired");
    Ok(Json(RepairResp { repaired }))
}

// --- enrollment ---

async fn update_progress(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    body: Result<Json<UpdateProgressReq>, JsonRejection>,
) -> AppResult<Json<ProgressOverrideResp>> {
    let Json(req) = body?;
    let course_id = req
        .course_id
        .ok_or_else(|| AppError::validation("Course ID and progress are required"))?;
    let progress = enrollment::validate_progress(req.progress)?;

    let now = Utc::now();
    let resp = mutate(&db, student_id, course_id, |_, state, _| {
        state.override_progress(progress, now)
    })
    .await?;
    Ok(Json(resp))
}

async fn complete_course(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<CompletionResp>> {
    let now = Utc::now();
    let resp = mutate(&db, student_id, course_id, |_, state, _| {
        state.mark_course_completed(now)
    })
    .await?;
    Ok(Json(resp))
}

async fn list_enrolled(db: &Db, student_id: Uuid) -> AppResult<Vec<EnrolledCourse>> {
    let mut conn = db.acquire().await?;
    store::ensure_student(&mut *conn, student_id).await?;
    let rows = store::enrolled_courses(&mut *conn, student_id).await?;
    Ok(rows.into_iter().map(EnrolledCourse::from).collect())
}

async fn enrolled_courses(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
) -> AppResult<Json<EnrolledCourses>> {
    let courses = list_enrolled(&db, student_id).await?;
    Ok(Json(enrollment::bucket(courses)))
}

async fn investment_stats(
    State(db): State<Db>,
    TypedHeader(UserId(student_id)): TypedHeader<UserId>,
) -> AppResult<Json<InvestmentStats>> {
    let courses = list_enrolled(&db, student_id).await?;
    Ok(Json(enrollment::investment_stats(&courses)))
}
