//! Course progress: completed chapters and videos, watch times, and the
//! weighted overall percentage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::course::Course;
use crate::models::{CourseProgressRow, WatchTimeRow};
use crate::quiz::QuizProgress;

/// Share of a video that must be watched before its chapter completes.
pub const AUTO_COMPLETE_RATIO: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Weights {
    pub video: f64,
    pub quiz: f64,
    pub assignment: f64,
}

impl Weights {
    pub fn for_content(has_quizzes: bool, has_assignments: bool) -> Self {
        let (video, quiz, assignment) = match (has_quizzes, has_assignments) {
            (false, false) => (1.0, 0.0, 0.0),
            (true, false) => (0.7, 0.3, 0.0),
            (false, true) => (0.9, 0.0, 0.1),
            (true, true) => (0.6, 0.3, 0.1),
        };
        Self {
            video,
            quiz,
            assignment,
        }
    }

    pub fn for_course(course: &Course) -> Self {
        Self::for_content(course.has_quizzes(), course.has_assignments())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchTime {
    pub chapter_id: Uuid,
    pub watch_time: f64,
    pub total_duration: f64,
}

impl WatchTime {
    pub fn ratio(&self) -> f64 {
        if self.total_duration > 0.0 {
            self.watch_time / self.total_duration
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseProgress {
    pub course_id: Uuid,
    pub completed_chapters: BTreeSet<Uuid>,
    pub completed_videos: BTreeSet<String>,
    pub watch_times: BTreeMap<Uuid, WatchTime>,
    pub overall_progress: i32,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchReport {
    pub watch: WatchTime,
    /// True when this report pushed the chapter over the completion ratio.
    pub newly_completed: bool,
}

impl CourseProgress {
    pub fn new(course_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            course_id,
            completed_chapters: BTreeSet::new(),
            completed_videos: BTreeSet::new(),
            watch_times: BTreeMap::new(),
            overall_progress: 0,
            last_accessed_at: now,
        }
    }

    pub fn from_rows(row: CourseProgressRow, watch_times: Vec<WatchTimeRow>) -> Self {
        Self {
            course_id: row.course_id,
            completed_chapters: row.completed_chapters.into_iter().collect(),
            completed_videos: row.completed_videos.into_iter().collect(),
            watch_times: watch_times
                .into_iter()
                .map(|w| {
                    (
                        w.chapter_id,
                        WatchTime {
                            chapter_id: w.chapter_id,
                            watch_time: w.watch_time,
                            total_duration: w.total_duration,
                        },
                    )
                })
                .collect(),
            overall_progress: row.overall_progress,
            last_accessed_at: row.last_accessed_at,
        }
    }

    /// Returns true if the chapter was not complete before.
    pub fn complete_chapter(&mut self, chapter_id: Uuid) -> bool {
        let added = self.completed_chapters.insert(chapter_id);
        if added {
            tracing::info!(course_id = %self.course_id, %chapter_id, "chapter completed");
        }
        added
    }

    /// Watch time only ever grows. A positive `total_duration` replaces the
    /// stored duration.
    pub fn record_watch_time(
        &mut self,
        chapter_id: Uuid,
        watch_time: f64,
        total_duration: Option<f64>,
        now: DateTime<Utc>,
    ) -> WatchReport {
        let entry = self.watch_times.entry(chapter_id).or_insert(WatchTime {
            chapter_id,
            watch_time: 0.0,
            total_duration: 0.0,
        });
        entry.watch_time = entry.watch_time.max(watch_time);
        if let Some(total) = total_duration.filter(|t| *t > 0.0) {
            entry.total_duration = total;
        }
        let watch = *entry;
        self.last_accessed_at = now;

        let newly_completed = watch.ratio() >= AUTO_COMPLETE_RATIO && self.complete_chapter(chapter_id);
        WatchReport {
            watch,
            newly_completed,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }
}

/// Which computation produced an overall percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Chapter completion, quiz passes and assignment submissions, weighted.
    ChapterWeighted,
    /// Completed videos over all identified videos.
    VideoCount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBreakdown {
    pub mode: CompletionMode,
    pub overall_progress: i32,
    pub video_progress: i32,
    pub quiz_progress: i32,
    pub assignment_progress: i32,
    pub weights: Weights,
    pub completed_chapters: usize,
    pub total_chapters: usize,
    pub completed_videos: usize,
    pub total_videos: usize,
    pub passed_quizzes: usize,
    pub total_quiz_chapters: usize,
    pub submitted_assignments: usize,
    pub total_assignments: usize,
}

fn ratio_percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Weighted overall progress. Only identifiers that still exist in the
/// course count toward each ratio.
pub fn compute_weighted(
    course: &Course,
    progress: &CourseProgress,
    quizzes: &HashMap<Uuid, QuizProgress>,
    submitted_assignments: usize,
) -> ProgressBreakdown {
    let weights = Weights::for_course(course);

    let total_chapters = course.chapters.len();
    let completed_chapters = course
        .chapters
        .iter()
        .filter(|ch| progress.completed_chapters.contains(&ch.id))
        .count();

    let total_quiz_chapters = course.quiz_chapters().count();
    let passed_quizzes = course
        .quiz_chapters()
        .filter(|ch| quizzes.get(&ch.id).is_some_and(|qp| qp.passed))
        .count();

    let total_assignments = course.assignment_ids.len();
    let submitted_assignments = submitted_assignments.min(total_assignments);

    let video = ratio_percent(completed_chapters, total_chapters);
    let quiz = ratio_percent(passed_quizzes, total_quiz_chapters);
    let assignment = ratio_percent(submitted_assignments, total_assignments);

    let overall = (video * weights.video + quiz * weights.quiz + assignment * weights.assignment)
        .round()
        .clamp(0.0, 100.0) as i32;

    ProgressBreakdown {
        mode: CompletionMode::ChapterWeighted,
        overall_progress: overall,
        video_progress: video.round() as i32,
        quiz_progress: quiz.round() as i32,
        assignment_progress: assignment.round() as i32,
        weights,
        completed_chapters,
        total_chapters,
        completed_videos: count_completed_videos(course, progress),
        total_videos: course.total_videos(),
        passed_quizzes,
        total_quiz_chapters,
        submitted_assignments,
        total_assignments,
    }
}

fn count_completed_videos(course: &Course, progress: &CourseProgress) -> usize {
    course
        .video_ids()
        .into_iter()
        .filter(|id| progress.completed_videos.contains(*id))
        .count()
}

/// Video-only progress: completed vimeo ids over every vimeo id in the course.
pub fn compute_video_count(course: &Course, progress: &CourseProgress) -> ProgressBreakdown {
    let total_videos = course.video_ids().len();
    let completed_videos = count_completed_videos(course, progress);
    let video = ratio_percent(completed_videos, total_videos);
    let completed_chapters = course
        .chapters
        .iter()
        .filter(|ch| progress.completed_chapters.contains(&ch.id))
        .count();

    ProgressBreakdown {
        mode: CompletionMode::VideoCount,
        overall_progress: video.round().clamp(0.0, 100.0) as i32,
        video_progress: video.round() as i32,
        quiz_progress: 0,
        assignment_progress: 0,
        weights: Weights::for_content(false, false),
        completed_chapters,
        total_chapters: course.chapters.len(),
        completed_videos,
        total_videos,
        passed_quizzes: 0,
        total_quiz_chapters: 0,
        submitted_assignments: 0,
        total_assignments: 0,
    }
}

/// How a client reports a watched lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonWatched {
    /// Whole chapter watched; feeds the weighted computation.
    Chapter(Uuid),
    /// One vimeo video watched; feeds the video-count computation.
    Video(String),
}

impl LessonWatched {
    pub fn mode(&self) -> CompletionMode {
        match self {
            Self::Chapter(_) => CompletionMode::ChapterWeighted,
            Self::Video(_) => CompletionMode::VideoCount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::fixtures::*;
    use crate::quiz::Grade;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 8, 0, 0).unwrap()
    }

    fn passed_quiz(course_id: Uuid, chapter_id: Uuid) -> QuizProgress {
        let mut qp = QuizProgress::new(course_id, chapter_id, t0());
        qp.record(
            Grade { correct: 1, total: 1, score: 100, passed: true },
            vec![],
            t0(),
        );
        qp
    }

    #[test]
    fn weighting_table_is_total() {
        assert_eq!(Weights::for_content(false, false), Weights { video: 1.0, quiz: 0.0, assignment: 0.0 });
        assert_eq!(Weights::for_content(true, false), Weights { video: 0.7, quiz: 0.3, assignment: 0.0 });
        assert_eq!(Weights::for_content(false, true), Weights { video: 0.9, quiz: 0.0, assignment: 0.1 });
        assert_eq!(Weights::for_content(true, true), Weights { video: 0.6, quiz: 0.3, assignment: 0.1 });
        for q in [false, true] {
            for a in [false, true] {
                let w = Weights::for_content(q, a);
                assert!((w.video + w.quiz + w.assignment - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn empty_course_is_zero_not_nan() {
        let c = course(vec![], 0);
        let p = CourseProgress::new(c.id, t0());
        let b = compute_weighted(&c, &p, &HashMap::new(), 0);
        assert_eq!(b.overall_progress, 0);
        assert_eq!(compute_video_count(&c, &p).overall_progress, 0);
    }

    #[test]
    fn nothing_done_is_zero_everything_done_is_hundred() {
        let c = course(
            vec![
                chapter(vec![lesson(Some("v1"), vec![question("A")])]),
                chapter(vec![lesson(Some("v2"), vec![])]),
            ],
            2,
        );
        let mut p = CourseProgress::new(c.id, t0());
        assert_eq!(compute_weighted(&c, &p, &HashMap::new(), 0).overall_progress, 0);

        for ch in &c.chapters {
            p.complete_chapter(ch.id);
        }
        let quizzes = HashMap::from([(c.chapters[0].id, passed_quiz(c.id, c.chapters[0].id))]);
        let b = compute_weighted(&c, &p, &quizzes, 2);
        assert_eq!(b.overall_progress, 100);
        assert_eq!((b.video_progress, b.quiz_progress, b.assignment_progress), (100, 100, 100));
    }

    #[test]
    fn worked_example_is_seventy() {
        let quiz_chapter = chapter(vec![lesson(None, vec![question("A"), question("B")])]);
        let plain = chapter(vec![lesson(None, vec![])]);
        let c = course(vec![quiz_chapter, plain], 1);
        let mut p = CourseProgress::new(c.id, t0());
        p.complete_chapter(c.chapters[0].id);
        let quizzes = HashMap::from([(c.chapters[0].id, passed_quiz(c.id, c.chapters[0].id))]);

        let b = compute_weighted(&c, &p, &quizzes, 1);
        assert_eq!(b.weights, Weights { video: 0.6, quiz: 0.3, assignment: 0.1 });
        assert_eq!(b.video_progress, 50);
        assert_eq!(b.quiz_progress, 100);
        assert_eq!(b.assignment_progress, 100);
        assert_eq!(b.overall_progress, 70);
    }

    #[test]
    fn stale_ids_and_excess_submissions_stay_in_bounds() {
        let c = course(vec![chapter(vec![lesson(None, vec![])])], 1);
        let mut p = CourseProgress::new(c.id, t0());
        p.complete_chapter(c.chapters[0].id);
        p.complete_chapter(Uuid::new_v4());
        let b = compute_weighted(&c, &p, &HashMap::new(), 5);
        assert_eq!(b.completed_chapters, 1);
        assert_eq!(b.submitted_assignments, 1);
        assert_eq!(b.overall_progress, 100);
    }

    #[test]
    fn failed_quiz_does_not_count() {
        let c = course(vec![chapter(vec![lesson(None, vec![question("A")])])], 0);
        let p = CourseProgress::new(c.id, t0());
        let mut qp = QuizProgress::new(c.id, c.chapters[0].id, t0());
        qp.record(Grade { correct: 0, total: 1, score: 0, passed: false }, vec![], t0());
        let quizzes = HashMap::from([(c.chapters[0].id, qp)]);
        let b = compute_weighted(&c, &p, &quizzes, 0);
        assert_eq!(b.passed_quizzes, 0);
        assert_eq!(b.overall_progress, 0);
    }

    #[test]
    fn watch_time_is_monotonic() {
        let mut p = CourseProgress::new(Uuid::new_v4(), t0());
        let ch = Uuid::new_v4();
        p.record_watch_time(ch, 300.0, Some(1000.0), t0());
        let report = p.record_watch_time(ch, 120.0, None, t0());
        assert_eq!(report.watch.watch_time, 300.0);
        assert_eq!(report.watch.total_duration, 1000.0);
        assert!(!report.newly_completed);
    }

    #[test]
    fn ninety_percent_completes_once() {
        let mut p = CourseProgress::new(Uuid::new_v4(), t0());
        let ch = Uuid::new_v4();
        let first = p.record_watch_time(ch, 899.0, Some(1000.0), t0());
        assert!(!first.newly_completed);
        let second = p.record_watch_time(ch, 900.0, Some(1000.0), t0());
        assert!(second.newly_completed);
        let third = p.record_watch_time(ch, 1000.0, Some(1000.0), t0());
        assert!(!third.newly_completed);
        assert_eq!(p.completed_chapters.len(), 1);
    }

    #[test]
    fn unknown_duration_never_completes() {
        let mut p = CourseProgress::new(Uuid::new_v4(), t0());
        let report = p.record_watch_time(Uuid::new_v4(), 500.0, None, t0());
        assert_eq!(report.watch.ratio(), 0.0);
        assert!(p.completed_chapters.is_empty());
    }

    #[test]
    fn video_count_mode_uses_identified_videos() {
        let c = course(
            vec![
                chapter(vec![lesson(Some("v1"), vec![]), lesson(Some("v2"), vec![])]),
                chapter(vec![lesson(Some("v3"), vec![]), lesson(Some("v4"), vec![])]),
            ],
            0,
        );
        let mut p = CourseProgress::new(c.id, t0());
        p.completed_videos.insert("v1".into());
        p.completed_videos.insert("gone".into());
        let b = compute_video_count(&c, &p);
        assert_eq!(b.mode, CompletionMode::VideoCount);
        assert_eq!(b.completed_videos, 1);
        assert_eq!(b.total_videos, 4);
        assert_eq!(b.overall_progress, 25);
    }

    #[test]
    fn lesson_watched_selects_mode() {
        assert_eq!(LessonWatched::Chapter(Uuid::new_v4()).mode(), CompletionMode::ChapterWeighted);
        assert_eq!(LessonWatched::Video("1".into()).mode(), CompletionMode::VideoCount);
    }
}
