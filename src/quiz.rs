//! Chapter quiz scoring and per-chapter attempt history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::course::{Course, QuizQuestion};
use crate::models::{QuizAttemptRow, QuizProgressRow, StudentRow};
use crate::restriction::{InstructorApproval, RestrictionLever, RestrictionStatus, Restrictions};

/// Minimum score (percent) that passes a chapter quiz.
pub const PASS_THRESHOLD: i32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade {
    pub correct: usize,
    pub total: usize,
    pub score: i32,
    pub passed: bool,
}

/// Positional exact-match grading. Extra answers and unanswered questions
/// are ignored; the denominator is always the question count.
pub fn grade(questions: &[&QuizQuestion], answers: &[String]) -> Grade {
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.correct_answer == **a)
        .count();
    let total = questions.len();
    let score = percent_rounded(correct, total);
    Grade {
        correct,
        total,
        score,
        passed: score >= PASS_THRESHOLD,
    }
}

pub(crate) fn percent_rounded(part: usize, whole: usize) -> i32 {
    if whole == 0 {
        return 0;
    }
    (100.0 * part as f64 / whole as f64).round() as i32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub score: i32,
    pub answers: Vec<String>,
    pub attempted_at: DateTime<Utc>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizProgress {
    pub course_id: Uuid,
    pub chapter_id: Uuid,
    pub attempts: Vec<QuizAttempt>,
    pub best_score: i32,
    pub passed: bool,
    pub total_attempts: usize,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(flatten)]
    pub restrictions: Restrictions,
}

impl QuizProgress {
    pub fn new(course_id: Uuid, chapter_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            course_id,
            chapter_id,
            attempts: Vec::new(),
            best_score: 0,
            passed: false,
            total_attempts: 0,
            last_attempt_at: now,
            restrictions: Restrictions::default(),
        }
    }

    /// Appends an attempt and applies every derived update: best score,
    /// sticky pass, attempt count and the restriction transition.
    pub fn record(&mut self, grade: Grade, answers: Vec<String>, now: DateTime<Utc>) {
        self.attempts.push(QuizAttempt {
            score: grade.score,
            answers,
            attempted_at: now,
            passed: grade.passed,
        });
        self.best_score = self.best_score.max(grade.score);
        self.passed |= grade.passed;
        self.total_attempts = self.attempts.len();
        self.last_attempt_at = now;
        self.restrictions
            .apply_outcome(grade.passed, self.total_attempts, now);
        tracing::info!(
            chapter_id = %self.chapter_id,
            score = grade.score,
            passed = grade.passed,
            total_attempts = self.total_attempts,
            "quiz attempt recorded"
        );
    }

    pub fn from_rows(row: QuizProgressRow, attempts: Vec<QuizAttemptRow>) -> Self {
        let mut attempts = attempts;
        attempts.sort_by_key(|a| a.seq);
        let attempts: Vec<QuizAttempt> = attempts
            .into_iter()
            .map(|a| QuizAttempt {
                score: a.score,
                answers: a.answers,
                attempted_at: a.attempted_at,
                passed: a.passed,
            })
            .collect();
        if usize::try_from(row.total_attempts).ok() != Some(attempts.len()) {
            tracing::warn!(
                chapter_id = %row.chapter_id,
                stored = row.total_attempts,
                actual = attempts.len(),
                "stored attempt count disagrees with attempt rows"
            );
        }
        Self {
            course_id: row.course_id,
            chapter_id: row.chapter_id,
            total_attempts: attempts.len(),
            attempts,
            best_score: row.best_score,
            passed: row.passed,
            last_attempt_at: row.last_attempt_at,
            restrictions: Restrictions {
                next_attempt_allowed_at: row.next_attempt_allowed_at,
                must_re_watch_video: row.must_rewatch_video,
                video_re_watched_at: row.video_rewatched_at,
                instructor_approval: InstructorApproval {
                    required: row.instructor_approval_required,
                    granted: row.instructor_approval_granted,
                    granted_at: row.instructor_approval_granted_at,
                    granted_by: row.instructor_approval_granted_by,
                },
            },
        }
    }
}

/// Groups attempt rows under their progress rows.
pub fn assemble(rows: Vec<QuizProgressRow>, attempts: Vec<QuizAttemptRow>) -> Vec<QuizProgress> {
    let mut by_key: HashMap<(Uuid, Uuid, Uuid), Vec<QuizAttemptRow>> = HashMap::new();
    for a in attempts {
        by_key
            .entry((a.student_id, a.course_id, a.chapter_id))
            .or_default()
            .push(a);
    }
    rows.into_iter()
        .map(|row| {
            let key = (row.student_id, row.course_id, row.chapter_id);
            let attempts = by_key.remove(&key).unwrap_or_default();
            QuizProgress::from_rows(row, attempts)
        })
        .collect()
}

// --- reporting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub total_quizzes: usize,
    pub passed_quizzes: usize,
    pub failed_quizzes: usize,
    pub total_attempts: usize,
    pub average_score: i32,
    pub pass_rate: i32,
}

pub fn summarize<'a>(progress: impl IntoIterator<Item = &'a QuizProgress>) -> QuizSummary {
    let mut summary = QuizSummary::default();
    let mut score_sum: i64 = 0;
    for qp in progress {
        summary.total_quizzes += 1;
        if qp.passed {
            summary.passed_quizzes += 1;
        }
        summary.total_attempts += qp.attempts.len();
        score_sum += i64::from(qp.best_score);
    }
    summary.failed_quizzes = summary.total_quizzes - summary.passed_quizzes;
    if summary.total_quizzes > 0 {
        summary.average_score = (score_sum as f64 / summary.total_quizzes as f64).round() as i32;
    }
    summary.pass_rate = percent_rounded(summary.passed_quizzes, summary.total_quizzes);
    summary
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptEntry {
    pub id: String,
    pub course: CourseRef,
    pub chapter: ChapterRef,
    pub quiz: QuizRef,
    pub attempt: AttemptDetail,
    pub best_score: i32,
    pub total_attempts: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub id: Uuid,
    pub title: String,
    pub instructor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRef {
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizRef {
    pub title: String,
    pub total_questions: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptDetail {
    pub score: i32,
    pub passed: bool,
    pub attempted_at: DateTime<Utc>,
    pub correct_answers: usize,
    pub total_questions: usize,
    pub status: &'static str,
}

/// Flattens quiz progress into one entry per attempt, newest first.
/// Progress whose course or chapter no longer exists is skipped.
pub fn attempt_history(progress: &[QuizProgress], courses: &[Course]) -> Vec<AttemptEntry> {
    let mut entries = Vec::new();
    for qp in progress {
        let Some(course) = courses.iter().find(|c| c.id == qp.course_id) else {
            continue;
        };
        let Some(chapter) = course.chapter(qp.chapter_id) else {
            continue;
        };
        let total_questions = chapter.quiz_questions().len();
        for (index, attempt) in qp.attempts.iter().enumerate() {
            let correct_answers =
                (f64::from(attempt.score) / 100.0 * total_questions as f64).round() as usize;
            entries.push(AttemptEntry {
                id: format!("{}_{}_{}", qp.course_id, qp.chapter_id, index),
                course: CourseRef {
                    id: course.id,
                    title: course.title.clone(),
                    instructor_id: course.instructor_id,
                },
                chapter: ChapterRef {
                    id: chapter.id,
                    title: chapter.title.clone(),
                },
                quiz: QuizRef {
                    title: format!("{} Quiz", chapter.title),
                    total_questions,
                },
                attempt: AttemptDetail {
                    score: attempt.score,
                    passed: attempt.passed,
                    attempted_at: attempt.attempted_at,
                    correct_answers,
                    total_questions,
                    status: if attempt.passed { "passed" } else { "failed" },
                },
                best_score: qp.best_score,
                total_attempts: qp.attempts.len(),
            });
        }
    }
    entries.sort_by(|a, b| b.attempt.attempted_at.cmp(&a.attempt.attempted_at));
    entries
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstructorAnalytics {
    pub course_overview: Vec<CourseQuizOverview>,
    pub restriction_stats: RestrictionStats,
    pub performance_metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseQuizOverview {
    pub course_id: Uuid,
    pub course_name: String,
    pub total_chapters: usize,
    pub students_enrolled: usize,
    pub completion_stats: CompletionStats,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub quizzes_passed: usize,
    pub quizzes_attempted: usize,
    pub average_score: i32,
    pub pass_rate: i32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionStats {
    pub students_in_time_restriction: usize,
    pub total_students_with_restrictions: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub average_pass_rate: i32,
    pub average_score: i32,
    pub total_quiz_attempts: usize,
    pub total_students: usize,
}

/// Aggregates quiz progress of many students over an instructor's courses.
/// `progress` pairs each record with the student it belongs to.
pub fn instructor_analytics(
    courses: &[Course],
    progress: &[(Uuid, QuizProgress)],
    now: DateTime<Utc>,
) -> InstructorAnalytics {
    let mut overview = Vec::with_capacity(courses.len());
    let mut all_students: HashSet<Uuid> = HashSet::new();
    let mut passed_total = 0usize;
    let mut attempted_total = 0usize;
    let mut score_total: i64 = 0;
    let mut attempts_total = 0usize;

    for course in courses {
        let records: Vec<&(Uuid, QuizProgress)> = progress
            .iter()
            .filter(|(_, qp)| qp.course_id == course.id)
            .collect();
        let students: HashSet<Uuid> = records.iter().map(|(s, _)| *s).collect();
        all_students.extend(&students);

        let passed = records.iter().filter(|(_, qp)| qp.passed).count();
        let attempted = records.len();
        let scores: i64 = records.iter().map(|(_, qp)| i64::from(qp.best_score)).sum();
        let attempts: usize = records.iter().map(|(_, qp)| qp.attempts.len()).sum();

        let average_score = if attempted > 0 {
            (scores as f64 / attempted as f64).round() as i32
        } else {
            0
        };

        passed_total += passed;
        attempted_total += attempted;
        score_total += scores;
        attempts_total += attempts;

        overview.push(CourseQuizOverview {
            course_id: course.id,
            course_name: course.title.clone(),
            total_chapters: course.chapters.len(),
            students_enrolled: students.len(),
            completion_stats: CompletionStats {
                quizzes_passed: passed,
                quizzes_attempted: attempted,
                average_score,
                pass_rate: percent_rounded(passed, attempted),
            },
        });
    }

    let mut restriction_stats = RestrictionStats::default();
    for (_, qp) in progress
        .iter()
        .filter(|(_, qp)| courses.iter().any(|c| c.id == qp.course_id))
    {
        let levers = qp.restrictions.active_levers(now);
        if levers.contains(&RestrictionLever::TimeCooldown) {
            restriction_stats.students_in_time_restriction += 1;
        }
        if levers.into_iter().any(RestrictionLever::is_enforced) {
            restriction_stats.total_students_with_restrictions += 1;
        }
    }

    let average_score = if attempted_total > 0 {
        (score_total as f64 / attempted_total as f64).round() as i32
    } else {
        0
    };

    InstructorAnalytics {
        course_overview: overview,
        restriction_stats,
        performance_metrics: PerformanceMetrics {
            average_pass_rate: percent_rounded(passed_total, attempted_total),
            average_score,
            total_quiz_attempts: attempts_total,
            total_students: all_students.len(),
        },
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuizProgress {
    pub student_id: Uuid,
    pub student_name: Option<String>,
    pub student_email: Option<String>,
    pub courses: Vec<StudentCourseQuizProgress>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseQuizProgress {
    pub course_id: Uuid,
    pub course_name: String,
    pub total_chapters: usize,
    pub overall_progress: i32,
    pub restriction_status: CourseRestrictionStatus,
    pub quiz_progress: Vec<ChapterQuizProgress>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CourseRestrictionStatus {
    pub has_time_restriction: bool,
    pub next_attempt_allowed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterQuizProgress {
    pub chapter_id: Uuid,
    pub attempts: Vec<QuizAttempt>,
    pub attempts_count: usize,
    pub best_score: i32,
    pub passed: bool,
    pub last_attempt_at: DateTime<Utc>,
    pub total_attempts: usize,
    pub restriction_status: ChapterRestrictionStatus,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRestrictionStatus {
    pub time_restricted: bool,
    pub video_re_watch_required: bool,
    pub instructor_approval_required: bool,
    pub next_attempt_allowed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstructorStudentProgress {
    pub students: Vec<StudentQuizProgress>,
    pub total: usize,
}

/// Per-student quiz detail across an instructor's courses. Students are
/// listed in the order given; courses where a student has no quiz progress
/// are left out, and so are students left with no courses.
/// `overall` maps (student, course) to the stored overall progress.
pub fn instructor_student_progress(
    courses: &[Course],
    students: &[StudentRow],
    progress: &[(Uuid, QuizProgress)],
    overall: &HashMap<(Uuid, Uuid), i32>,
    now: DateTime<Utc>,
) -> InstructorStudentProgress {
    let mut listed = Vec::new();
    for student in students {
        let mut entry = StudentQuizProgress {
            student_id: student.id,
            student_name: student.name.clone(),
            student_email: student.email.clone(),
            courses: Vec::new(),
        };

        for course in courses {
            let mut course_entry = StudentCourseQuizProgress {
                course_id: course.id,
                course_name: course.title.clone(),
                total_chapters: course.chapters.len(),
                overall_progress: overall.get(&(student.id, course.id)).copied().unwrap_or(0),
                restriction_status: CourseRestrictionStatus::default(),
                quiz_progress: Vec::new(),
            };

            for (_, qp) in progress
                .iter()
                .filter(|(s, qp)| *s == student.id && qp.course_id == course.id)
            {
                let cooling = match qp.restrictions.status(now) {
                    RestrictionStatus::CoolingDown { until } => Some(until),
                    RestrictionStatus::Unrestricted => None,
                };
                if let Some(until) = cooling {
                    course_entry.restriction_status = CourseRestrictionStatus {
                        has_time_restriction: true,
                        next_attempt_allowed: Some(until),
                    };
                }
                course_entry.quiz_progress.push(ChapterQuizProgress {
                    chapter_id: qp.chapter_id,
                    attempts: qp.attempts.clone(),
                    attempts_count: qp.attempts.len(),
                    best_score: qp.best_score,
                    passed: qp.passed,
                    last_attempt_at: qp.last_attempt_at,
                    total_attempts: qp.total_attempts,
                    restriction_status: ChapterRestrictionStatus {
                        time_restricted: cooling.is_some(),
                        video_re_watch_required: qp.restrictions.must_re_watch_video,
                        instructor_approval_required: qp.restrictions.instructor_approval.required,
                        next_attempt_allowed_at: cooling,
                    },
                });
            }

            if !course_entry.quiz_progress.is_empty() {
                entry.courses.push(course_entry);
            }
        }

        if !entry.courses.is_empty() {
            listed.push(entry);
        }
    }

    InstructorStudentProgress {
        total: listed.len(),
        students: listed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::fixtures::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn answers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn grades_by_position_with_exact_match() {
        let qs = [question("A"), question("B"), question("C")];
        let refs: Vec<&QuizQuestion> = qs.iter().collect();

        let g = grade(&refs, &answers(&["A", "B", "C"]));
        assert_eq!((g.correct, g.total, g.score, g.passed), (3, 3, 100, true));

        let g = grade(&refs, &answers(&["a", "B", "x"]));
        assert_eq!((g.correct, g.score, g.passed), (1, 33, false));
    }

    #[test]
    fn short_and_long_answer_lists_are_not_adjusted() {
        let qs = [question("A"), question("B"), question("C")];
        let refs: Vec<&QuizQuestion> = qs.iter().collect();

        let short = grade(&refs, &answers(&["A", "B"]));
        assert_eq!((short.correct, short.score, short.passed), (2, 67, true));

        let long = grade(&refs, &answers(&["A", "X", "X", "A", "B"]));
        assert_eq!((long.correct, long.total, long.score), (1, 3, 33));
    }

    #[test]
    fn threshold_is_inclusive() {
        let qs: Vec<QuizQuestion> = (0..5).map(|_| question("A")).collect();
        let refs: Vec<&QuizQuestion> = qs.iter().collect();
        let g = grade(&refs, &answers(&["A", "A", "A", "B", "B"]));
        assert_eq!(g.score, 60);
        assert!(g.passed);
    }

    #[test]
    fn half_scores_round_up() {
        let qs: Vec<QuizQuestion> = (0..8).map(|_| question("A")).collect();
        let refs: Vec<&QuizQuestion> = qs.iter().collect();
        // 5/8 = 62.5
        let g = grade(&refs, &answers(&["A", "A", "A", "A", "A"]));
        assert_eq!(g.score, 63);
    }

    #[test]
    fn best_score_and_pass_are_monotonic() {
        let mut qp = QuizProgress::new(Uuid::new_v4(), Uuid::new_v4(), t0());
        let outcomes = [(40, false), (80, true), (20, false), (60, true), (0, false)];
        let mut prev_best = 0;
        let mut was_passed = false;
        for (i, (score, passed)) in outcomes.into_iter().enumerate() {
            let g = Grade {
                correct: 0,
                total: 5,
                score,
                passed,
            };
            qp.record(g, vec![], t0() + Duration::minutes(i as i64));
            assert!(qp.best_score >= prev_best);
            assert!(!was_passed || qp.passed);
            assert_eq!(qp.total_attempts, qp.attempts.len());
            prev_best = qp.best_score;
            was_passed = qp.passed;
        }
        assert_eq!(qp.best_score, 80);
        assert!(qp.passed);
        assert_eq!(qp.total_attempts, 5);
    }

    #[test]
    fn fourth_failure_restricts_and_pass_clears() {
        let mut qp = QuizProgress::new(Uuid::new_v4(), Uuid::new_v4(), t0());
        let fail = Grade {
            correct: 0,
            total: 2,
            score: 0,
            passed: false,
        };
        for _ in 0..3 {
            qp.record(fail, vec![], t0());
            assert!(qp.restrictions.next_attempt_allowed_at.is_none());
        }
        qp.record(fail, vec![], t0());
        assert_eq!(
            qp.restrictions.next_attempt_allowed_at,
            Some(t0() + Duration::hours(24))
        );
        let pass = Grade {
            correct: 2,
            total: 2,
            score: 100,
            passed: true,
        };
        qp.record(pass, vec![], t0() + Duration::hours(30));
        assert!(qp.restrictions.next_attempt_allowed_at.is_none());
    }

    #[test]
    fn from_rows_recomputes_attempt_count() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let chapter = Uuid::new_v4();
        let row = QuizProgressRow {
            student_id: student,
            course_id: course,
            chapter_id: chapter,
            best_score: 50,
            passed: false,
            total_attempts: 7,
            last_attempt_at: t0(),
            next_attempt_allowed_at: None,
            must_rewatch_video: false,
            video_rewatched_at: None,
            instructor_approval_required: false,
            instructor_approval_granted: false,
            instructor_approval_granted_at: None,
            instructor_approval_granted_by: None,
        };
        let attempt = |seq: i32, score: i32| QuizAttemptRow {
            student_id: student,
            course_id: course,
            chapter_id: chapter,
            seq,
            score,
            answers: vec![],
            attempted_at: t0(),
            passed: false,
        };
        let qp = assemble(vec![row], vec![attempt(1, 50), attempt(0, 10)]).remove(0);
        assert_eq!(qp.total_attempts, 2);
        assert_eq!(qp.attempts[0].score, 10);
    }

    #[test]
    fn summary_over_quizzes() {
        let mut a = QuizProgress::new(Uuid::new_v4(), Uuid::new_v4(), t0());
        a.record(
            Grade { correct: 1, total: 1, score: 100, passed: true },
            vec![],
            t0(),
        );
        let mut b = QuizProgress::new(Uuid::new_v4(), Uuid::new_v4(), t0());
        for score in [25, 45] {
            b.record(
                Grade { correct: 0, total: 4, score, passed: false },
                vec![],
                t0(),
            );
        }
        let s = summarize([&a, &b]);
        assert_eq!(s.total_quizzes, 2);
        assert_eq!(s.passed_quizzes, 1);
        assert_eq!(s.failed_quizzes, 1);
        assert_eq!(s.total_attempts, 3);
        assert_eq!(s.average_score, 73);
        assert_eq!(s.pass_rate, 50);

        assert_eq!(summarize(std::iter::empty()), QuizSummary::default());
    }

    #[test]
    fn history_is_newest_first_and_skips_missing_content() {
        let c = course(
            vec![chapter(vec![lesson(None, vec![question("A"), question("B")])])],
            0,
        );
        let mut qp = QuizProgress::new(c.id, c.chapters[0].id, t0());
        qp.record(Grade { correct: 1, total: 2, score: 50, passed: false }, vec![], t0());
        qp.record(
            Grade { correct: 2, total: 2, score: 100, passed: true },
            vec![],
            t0() + Duration::hours(1),
        );
        let orphan = QuizProgress::new(c.id, Uuid::new_v4(), t0());

        let history = attempt_history(&[qp, orphan], std::slice::from_ref(&c));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt.score, 100);
        assert_eq!(history[0].attempt.status, "passed");
        assert_eq!(history[1].attempt.correct_answers, 1);
        assert_eq!(history[1].id, format!("{}_{}_0", c.id, c.chapters[0].id));
        assert_eq!(history[0].quiz.title, "chapter Quiz");
    }

    #[test]
    fn analytics_counts_students_and_restrictions() {
        let c = course(
            vec![
                chapter(vec![lesson(None, vec![question("A")])]),
                chapter(vec![lesson(None, vec![question("B")])]),
            ],
            0,
        );
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut a1 = QuizProgress::new(c.id, c.chapters[0].id, t0());
        a1.record(Grade { correct: 1, total: 1, score: 100, passed: true }, vec![], t0());
        let mut b1 = QuizProgress::new(c.id, c.chapters[0].id, t0());
        for _ in 0..4 {
            b1.record(Grade { correct: 0, total: 1, score: 0, passed: false }, vec![], t0());
        }
        let unrelated = QuizProgress::new(Uuid::new_v4(), Uuid::new_v4(), t0());

        let analytics = instructor_analytics(
            std::slice::from_ref(&c),
            &[(alice, a1), (bob, b1), (bob, unrelated)],
            t0() + Duration::hours(1),
        );
        let ov = &analytics.course_overview[0];
        assert_eq!(ov.total_chapters, 2);
        assert_eq!(ov.students_enrolled, 2);
        assert_eq!(ov.completion_stats.quizzes_passed, 1);
        assert_eq!(ov.completion_stats.quizzes_attempted, 2);
        assert_eq!(ov.completion_stats.average_score, 50);
        assert_eq!(ov.completion_stats.pass_rate, 50);
        assert_eq!(analytics.restriction_stats.students_in_time_restriction, 1);
        assert_eq!(analytics.restriction_stats.total_students_with_restrictions, 1);
        assert_eq!(analytics.performance_metrics.total_quiz_attempts, 5);
        assert_eq!(analytics.performance_metrics.total_students, 2);
        assert_eq!(analytics.performance_metrics.average_pass_rate, 50);
    }

    #[test]
    fn inert_levers_are_not_counted_as_restrictions() {
        let c = course(vec![chapter(vec![lesson(None, vec![question("A")])])], 0);
        let mut qp = QuizProgress::new(c.id, c.chapters[0].id, t0());
        qp.record(Grade { correct: 0, total: 1, score: 0, passed: false }, vec![], t0());
        qp.restrictions.must_re_watch_video = true;
        qp.restrictions.instructor_approval.required = true;

        let analytics = instructor_analytics(
            std::slice::from_ref(&c),
            &[(Uuid::new_v4(), qp)],
            t0() + Duration::hours(1),
        );
        let stats = analytics.restriction_stats;
        assert_eq!(stats.students_in_time_restriction, 0);
        assert_eq!(stats.total_students_with_restrictions, 0);
    }

    fn student(name: &str) -> StudentRow {
        StudentRow {
            id: Uuid::new_v4(),
            name: Some(name.into()),
            email: Some(format!("{name}@example.org")),
        }
    }

    #[test]
    fn student_progress_flags_only_active_cooldowns() {
        let c = course(
            vec![
                chapter(vec![lesson(None, vec![question("A")])]),
                chapter(vec![lesson(None, vec![question("B")])]),
            ],
            0,
        );
        let quiet = course(vec![chapter(vec![lesson(None, vec![question("C")])])], 0);
        let ada = student("ada");
        let idle = student("idle");

        let fail = Grade { correct: 0, total: 1, score: 0, passed: false };
        let mut locked = QuizProgress::new(c.id, c.chapters[0].id, t0());
        for _ in 0..4 {
            locked.record(fail, vec!["X".into()], t0());
        }
        let mut open = QuizProgress::new(c.id, c.chapters[1].id, t0());
        open.record(fail, vec!["X".into()], t0());

        let progress = [(ada.id, locked), (ada.id, open)];
        let overall = HashMap::from([((ada.id, c.id), 40)]);
        let courses = [c.clone(), quiet];
        let students = [ada.clone(), idle];

        let during = instructor_student_progress(
            &courses,
            &students,
            &progress,
            &overall,
            t0() + Duration::hours(1),
        );
        assert_eq!(during.total, 1);
        let entry = &during.students[0];
        assert_eq!(entry.student_id, ada.id);
        assert_eq!(entry.student_email.as_deref(), Some("ada@example.org"));
        assert_eq!(entry.courses.len(), 1);
        let course_entry = &entry.courses[0];
        assert_eq!(course_entry.course_id, c.id);
        assert_eq!(course_entry.overall_progress, 40);
        assert!(course_entry.restriction_status.has_time_restriction);
        let by_chapter = |id: Uuid| {
            course_entry
                .quiz_progress
                .iter()
                .find(|q| q.chapter_id == id)
                .unwrap()
        };
        let first = by_chapter(c.chapters[0].id);
        assert!(first.restriction_status.time_restricted);
        assert_eq!(
            first.restriction_status.next_attempt_allowed_at,
            Some(t0() + Duration::hours(24))
        );
        assert_eq!(first.attempts_count, 4);
        assert!(!by_chapter(c.chapters[1].id).restriction_status.time_restricted);

        let after = instructor_student_progress(
            &courses,
            &students,
            &progress,
            &overall,
            t0() + Duration::hours(25),
        );
        let course_entry = &after.students[0].courses[0];
        assert!(!course_entry.restriction_status.has_time_restriction);
        assert!(course_entry
            .quiz_progress
            .iter()
            .all(|q| !q.restriction_status.time_restricted && q.restriction_status.next_attempt_allowed_at.is_none()));
    }
}
