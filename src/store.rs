//! Postgres persistence for per-student progress state.
//!
//! Every mutation goes through [`lock_student`] first, inside the caller's
//! transaction, so writes for one student are serialized.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::enrollment::{CompletedCourse, Enrollment};
use crate::error::{AppError, AppResult};
use crate::models::{
    CompletedCourseRow, CourseProgressRow, EnrolledCourseRow, EnrollmentRow, OverallProgressRow,
    QuizAttemptRow, QuizProgressRow, StudentRow, WatchTimeRow,
};
use crate::progress::CourseProgress;
use crate::quiz::{self, QuizProgress};
use crate::tracker::StudentCourse;

const QUIZ_PROGRESS_COLUMNS: &str = r#"
    student_id, course_id, chapter_id, best_score, passed, total_attempts, last_attempt_at,
    next_attempt_allowed_at, must_rewatch_video, video_rewatched_at,
    instructor_approval_required, instructor_approval_granted,
    instructor_approval_granted_at, instructor_approval_granted_by
"#;

const QUIZ_ATTEMPT_COLUMNS: &str =
    "student_id, course_id, chapter_id, seq, score, answers, attempted_at, passed";

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Takes the student's row lock for the rest of the transaction.
pub async fn lock_student(conn: &mut PgConnection, student_id: Uuid) -> AppResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM students WHERE id = $1 FOR UPDATE")
        .bind(student_id)
        .fetch_optional(conn)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Student not found"))
}

pub async fn ensure_student(conn: &mut PgConnection, student_id: Uuid) -> AppResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM students WHERE id = $1")
        .bind(student_id)
        .fetch_optional(conn)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Student not found"))
}

pub async fn load_student_course(
    conn: &mut PgConnection,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<StudentCourse, sqlx::Error> {
    let mut state = StudentCourse::new(student_id, course_id);

    let progress_row = sqlx::query_as::<_, CourseProgressRow>(
        r#"SELECT course_id, completed_chapters, completed_videos, overall_progress, last_accessed_at
           FROM course_progress WHERE student_id = $1 AND course_id = $2"#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = progress_row {
        let watch_times = sqlx::query_as::<_, WatchTimeRow>(
            r#"SELECT chapter_id, watch_time, total_duration
               FROM chapter_watch_times WHERE student_id = $1 AND course_id = $2"#,
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;
        state.progress = Some(CourseProgress::from_rows(row, watch_times));
    }

    let quizzes = student_quiz_progress(&mut *conn, student_id, Some(course_id)).await?;
    state.quizzes = quizzes.into_iter().map(|qp| (qp.chapter_id, qp)).collect();
    state.mark_saved();

    state.enrollment = sqlx::query_as::<_, EnrollmentRow>(
        r#"SELECT course_id, purchased, progress, last_accessed
           FROM enrollments WHERE student_id = $1 AND course_id = $2"#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(Enrollment::from_row);

    state.completion = sqlx::query_as::<_, CompletedCourseRow>(
        r#"SELECT course_id, completed_on, certificate_id
           FROM completed_courses WHERE student_id = $1 AND course_id = $2"#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(CompletedCourse::from);

    Ok(state)
}

/// Writes the state back. Quiz records are written only when they gained
/// attempts since loading, and only those new attempts are inserted.
pub async fn save_student_course(
    conn: &mut PgConnection,
    state: &StudentCourse,
) -> Result<(), sqlx::Error> {
    let student_id = state.student_id;
    let course_id = state.course_id;

    if let Some(p) = &state.progress {
        save_course_progress(&mut *conn, student_id, p).await?;
    }

    for (qp, first_unsaved) in state.unsaved_quizzes() {
        save_quiz_progress(&mut *conn, student_id, qp, first_unsaved).await?;
    }

    if let Some(e) = &state.enrollment {
        sqlx::query(
            r#"UPDATE enrollments SET progress = $3, last_accessed = $4
               WHERE student_id = $1 AND course_id = $2"#,
        )
        .bind(student_id)
        .bind(course_id)
        .bind(e.progress)
        .bind(e.last_accessed)
        .execute(&mut *conn)
        .await?;
    }

    if let Some(c) = &state.completion {
        sqlx::query(
            r#"
            INSERT INTO completed_courses (student_id, course_id, completed_on, certificate_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, course_id)
            DO UPDATE SET completed_on = EXCLUDED.completed_on
            "#,
        )
        .bind(student_id)
        .bind(c.course_id)
        .bind(c.completed_on)
        .bind(c.certificate_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn save_course_progress(
    conn: &mut PgConnection,
    student_id: Uuid,
    p: &CourseProgress,
) -> Result<(), sqlx::Error> {
    let chapters: Vec<Uuid> = p.completed_chapters.iter().copied().collect();
    let videos: Vec<String> = p.completed_videos.iter().cloned().collect();
    sqlx::query(
        r#"
        INSERT INTO course_progress
            (student_id, course_id, completed_chapters, completed_videos, overall_progress, last_accessed_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (student_id, course_id)
        DO UPDATE SET completed_chapters = EXCLUDED.completed_chapters,
                      completed_videos = EXCLUDED.completed_videos,
                      overall_progress = EXCLUDED.overall_progress,
                      last_accessed_at = EXCLUDED.last_accessed_at
        "#,
    )
    .bind(student_id)
    .bind(p.course_id)
    .bind(chapters)
    .bind(videos)
    .bind(p.overall_progress)
    .bind(p.last_accessed_at)
    .execute(&mut *conn)
    .await?;

    for w in p.watch_times.values() {
        sqlx::query(
            r#"
            INSERT INTO chapter_watch_times (student_id, course_id, chapter_id, watch_time, total_duration)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, course_id, chapter_id)
            DO UPDATE SET watch_time = EXCLUDED.watch_time, total_duration = EXCLUDED.total_duration
            "#,
        )
        .bind(student_id)
        .bind(p.course_id)
        .bind(w.chapter_id)
        .bind(w.watch_time)
        .bind(w.total_duration)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn save_quiz_progress(
    conn: &mut PgConnection,
    student_id: Uuid,
    qp: &QuizProgress,
    first_unsaved: usize,
) -> Result<(), sqlx::Error> {
    let r = &qp.restrictions;
    sqlx::query(
        r#"
        INSERT INTO quiz_progress
            (student_id, course_id, chapter_id, best_score, passed, total_attempts, last_attempt_at,
             next_attempt_allowed_at, must_rewatch_video, video_rewatched_at,
             instructor_approval_required, instructor_approval_granted,
             instructor_approval_granted_at, instructor_approval_granted_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (student_id, course_id, chapter_id)
        DO UPDATE SET best_score = EXCLUDED.best_score,
                      passed = EXCLUDED.passed,
                      total_attempts = EXCLUDED.total_attempts,
                      last_attempt_at = EXCLUDED.last_attempt_at,
                      next_attempt_allowed_at = EXCLUDED.next_attempt_allowed_at,
                      must_rewatch_video = EXCLUDED.must_rewatch_video,
                      video_rewatched_at = EXCLUDED.video_rewatched_at,
                      instructor_approval_required = EXCLUDED.instructor_approval_required,
                      instructor_approval_granted = EXCLUDED.instructor_approval_granted,
                      instructor_approval_granted_at = EXCLUDED.instructor_approval_granted_at,
                      instructor_approval_granted_by = EXCLUDED.instructor_approval_granted_by
        "#,
    )
    .bind(student_id)
    .bind(qp.course_id)
    .bind(qp.chapter_id)
    .bind(qp.best_score)
    .bind(qp.passed)
    .bind(to_i32(qp.total_attempts))
    .bind(qp.last_attempt_at)
    .bind(r.next_attempt_allowed_at)
    .bind(r.must_re_watch_video)
    .bind(r.video_re_watched_at)
    .bind(r.instructor_approval.required)
    .bind(r.instructor_approval.granted)
    .bind(r.instructor_approval.granted_at)
    .bind(r.instructor_approval.granted_by)
    .execute(&mut *conn)
    .await?;

    for (seq, a) in qp.attempts.iter().enumerate().skip(first_unsaved) {
        sqlx::query(
            r#"
            INSERT INTO quiz_attempts
                (student_id, course_id, chapter_id, seq, score, answers, attempted_at, passed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (student_id, course_id, chapter_id, seq) DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(qp.course_id)
        .bind(qp.chapter_id)
        .bind(to_i32(seq))
        .bind(a.score)
        .bind(&a.answers)
        .bind(a.attempted_at)
        .bind(a.passed)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Distinct assignments of the course with a submitted or graded submission.
pub async fn submitted_assignments(
    conn: &mut PgConnection,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<usize, sqlx::Error> {
    let n: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT s.assignment_id)
        FROM submissions s JOIN assignments a ON a.id = s.assignment_id
        WHERE s.student_id = $1 AND a.course_id = $2 AND s.status IN ('submitted', 'graded')
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(conn)
    .await?;
    Ok(usize::try_from(n).unwrap_or_default())
}

/// Quiz progress of one student, for one course or across every enrolled
/// course.
pub async fn student_quiz_progress(
    conn: &mut PgConnection,
    student_id: Uuid,
    course_id: Option<Uuid>,
) -> Result<Vec<QuizProgress>, sqlx::Error> {
    let filter = r#"
        WHERE student_id = $1
          AND ($2::uuid IS NULL AND course_id IN (SELECT course_id FROM enrollments WHERE student_id = $1)
               OR course_id = $2)
    "#;

    let rows = sqlx::query_as::<_, QuizProgressRow>(&format!(
        "SELECT {QUIZ_PROGRESS_COLUMNS} FROM quiz_progress {filter} ORDER BY last_attempt_at"
    ))
    .bind(student_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let attempts = sqlx::query_as::<_, QuizAttemptRow>(&format!(
        "SELECT {QUIZ_ATTEMPT_COLUMNS} FROM quiz_attempts {filter}"
    ))
    .bind(student_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(quiz::assemble(rows, attempts))
}

/// Quiz progress of every student in the given courses, paired with the
/// student id.
pub async fn course_quiz_progress(
    conn: &mut PgConnection,
    course_ids: &[Uuid],
) -> Result<Vec<(Uuid, QuizProgress)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QuizProgressRow>(&format!(
        "SELECT {QUIZ_PROGRESS_COLUMNS} FROM quiz_progress WHERE course_id = ANY($1)"
    ))
    .bind(course_ids)
    .fetch_all(&mut *conn)
    .await?;
    let students: Vec<Uuid> = rows.iter().map(|r| r.student_id).collect();

    let attempts = sqlx::query_as::<_, QuizAttemptRow>(&format!(
        "SELECT {QUIZ_ATTEMPT_COLUMNS} FROM quiz_attempts WHERE course_id = ANY($1)"
    ))
    .bind(course_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(students.into_iter().zip(quiz::assemble(rows, attempts)).collect())
}

pub async fn enrolled_course_ids(
    conn: &mut PgConnection,
    student_id: Uuid,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT course_id FROM enrollments WHERE student_id = $1 ORDER BY enrolled_at")
        .bind(student_id)
        .fetch_all(conn)
        .await
}

pub async fn enrolled_courses(
    conn: &mut PgConnection,
    student_id: Uuid,
) -> Result<Vec<EnrolledCourseRow>, sqlx::Error> {
    sqlx::query_as::<_, EnrolledCourseRow>(
        r#"
        SELECT e.course_id, c.title, e.purchased, e.purchased_at, e.progress, e.last_accessed,
               e.payment_amount,
               (SELECT COUNT(*) FROM chapters ch WHERE ch.course_id = c.id) AS total_chapters,
               (SELECT COALESCE(SUM(l.video_duration_secs), 0)
                  FROM lessons l JOIN chapters ch ON ch.id = l.chapter_id
                 WHERE ch.course_id = c.id AND l.has_video)::BIGINT AS total_duration
        FROM enrollments e JOIN courses c ON c.id = e.course_id
        WHERE e.student_id = $1
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(student_id)
    .fetch_all(conn)
    .await
}

/// Courses taught by `instructor_id`, optionally narrowed to one course.
pub async fn instructor_course_ids(
    conn: &mut PgConnection,
    instructor_id: Uuid,
    course_id: Option<Uuid>,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT id FROM courses
           WHERE instructor_id = $1 AND ($2::uuid IS NULL OR id = $2)
           ORDER BY title, id"#,
    )
    .bind(instructor_id)
    .bind(course_id)
    .fetch_all(conn)
    .await
}

/// Removes quiz progress (attempts cascade). Returns the number of
/// progress records removed.
pub async fn reset_quiz_progress(
    conn: &mut PgConnection,
    student_id: Uuid,
    course_id: Uuid,
    chapter_id: Option<Uuid>,
) -> Result<u64, sqlx::Error> {
    let done = sqlx::query(
        r#"DELETE FROM quiz_progress
           WHERE student_id = $1 AND course_id = $2 AND ($3::uuid IS NULL OR chapter_id = $3)"#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(chapter_id)
    .execute(conn)
    .await?;
    Ok(done.rows_affected())
}

/// Students by id, ordered by name.
pub async fn students(
    conn: &mut PgConnection,
    student_ids: &[Uuid],
) -> Result<Vec<StudentRow>, sqlx::Error> {
    sqlx::query_as::<_, StudentRow>(
        "SELECT id, name, email FROM students WHERE id = ANY($1) ORDER BY name NULLS LAST, id",
    )
    .bind(student_ids)
    .fetch_all(conn)
    .await
}

/// Stored overall progress for every student in the given courses.
pub async fn overall_progress(
    conn: &mut PgConnection,
    course_ids: &[Uuid],
) -> Result<Vec<OverallProgressRow>, sqlx::Error> {
    sqlx::query_as::<_, OverallProgressRow>(
        "SELECT student_id, course_id, overall_progress FROM course_progress WHERE course_id = ANY($1)",
    )
    .bind(course_ids)
    .fetch_all(conn)
    .await
}

/// Courses a repair may touch: the caller must teach at least one.
pub fn repair_scope(instructor_courses: Vec<Uuid>) -> AppResult<Vec<Uuid>> {
    if instructor_courses.is_empty() {
        return Err(AppError::access_denied(
            "Only course instructors can repair attempt counts",
        ));
    }
    Ok(instructor_courses)
}

/// Rewrites `total_attempts` from the stored attempt rows wherever the two
/// disagree, within the given courses.
pub async fn repair_attempt_counts(
    conn: &mut PgConnection,
    course_ids: &[Uuid],
) -> Result<u64, sqlx::Error> {
    let done = sqlx::query(
        r#"
        UPDATE quiz_progress qp
        SET total_attempts = counts.n
        FROM (
            SELECT p.student_id, p.course_id, p.chapter_id, COUNT(a.seq)::INT AS n
            FROM quiz_progress p
            LEFT JOIN quiz_attempts a
              ON a.student_id = p.student_id AND a.course_id = p.course_id AND a.chapter_id = p.chapter_id
            WHERE p.course_id = ANY($1)
            GROUP BY p.student_id, p.course_id, p.chapter_id
        ) counts
        WHERE qp.student_id = counts.student_id
          AND qp.course_id = counts.course_id
          AND qp.chapter_id = counts.chapter_id
          AND qp.total_attempts <> counts.n
        "#,
    )
    .bind(course_ids)
    .execute(conn)
    .await?;
    Ok(done.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_needs_taught_courses() {
        assert!(matches!(repair_scope(vec![]), Err(AppError::AccessDenied(_))));
        let ids = vec![Uuid::new_v4()];
        assert_eq!(repair_scope(ids.clone()).unwrap(), ids);
    }
}
