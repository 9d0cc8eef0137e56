//! One student's state within one course, and every progress-affecting
//! operation on it. Handlers load a [`StudentCourse`] under the student's
//! row lock, apply one operation, and persist the result.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::course::Course;
use crate::enrollment::{CompletedCourse, Enrollment, Lifecycle};
use crate::error::{AppError, AppResult};
use crate::models::{
    CompletionResp, CourseProgressResp, ProgressOverrideResp, QuizStatusResp, QuizSubmissionResp,
    WatchTimeResp,
};
use crate::progress::{self, CourseProgress, LessonWatched, ProgressBreakdown};
use crate::quiz::{self, QuizProgress};
use crate::restriction::{self, AttemptCheck};

#[derive(Debug, Clone)]
pub struct StudentCourse {
    pub student_id: Uuid,
    pub course_id: Uuid,
    /// Created on the first progress-affecting action.
    pub progress: Option<CourseProgress>,
    /// Keyed by chapter id.
    pub quizzes: HashMap<Uuid, QuizProgress>,
    pub enrollment: Option<Enrollment>,
    pub completion: Option<CompletedCourse>,
    /// Attempts per chapter already in the store.
    saved_attempts: HashMap<Uuid, usize>,
}

impl StudentCourse {
    pub fn new(student_id: Uuid, course_id: Uuid) -> Self {
        Self {
            student_id,
            course_id,
            progress: None,
            quizzes: HashMap::new(),
            enrollment: None,
            completion: None,
            saved_attempts: HashMap::new(),
        }
    }

    /// Records the current attempt counts as persisted.
    pub fn mark_saved(&mut self) {
        self.saved_attempts = self
            .quizzes
            .iter()
            .map(|(chapter_id, qp)| (*chapter_id, qp.attempts.len()))
            .collect();
    }

    /// Quiz records with attempts not yet persisted, each paired with the
    /// index of its first unsaved attempt.
    pub fn unsaved_quizzes(&self) -> impl Iterator<Item = (&QuizProgress, usize)> + '_ {
        self.quizzes.values().filter_map(|qp| {
            let saved = self.saved_attempts.get(&qp.chapter_id).copied().unwrap_or(0);
            (qp.attempts.len() > saved).then_some((qp, saved))
        })
    }

    pub fn ensure_enrolled(&self) -> AppResult<()> {
        match self.enrollment {
            Some(_) => Ok(()),
            None => Err(AppError::access_denied(
                "Access denied. You need to enroll in this course first.",
            )),
        }
    }

    fn progress_mut(&mut self, now: DateTime<Utc>) -> &mut CourseProgress {
        let course_id = self.course_id;
        self.progress
            .get_or_insert_with(|| CourseProgress::new(course_id, now))
    }

    /// Writes an overall value onto the progress record and mirrors it onto
    /// the enrollment.
    fn publish(&mut self, breakdown: &ProgressBreakdown, now: DateTime<Utc>) {
        let progress = self.progress_mut(now);
        progress.overall_progress = breakdown.overall_progress;
        progress.touch(now);

        if let Some(enrollment) = self.enrollment.as_mut() {
            tracing::debug!(
                course_id = %enrollment.course_id,
                purchased = enrollment.purchased,
                progress = breakdown.overall_progress,
                "mirroring progress onto enrollment"
            );
            Lifecycle {
                enrollment,
                completion: &mut self.completion,
            }
            .apply_progress(breakdown.overall_progress, now);
        }
    }

    /// Weighted recomputation after a chapter, quiz or assignment change.
    pub fn recompute(
        &mut self,
        course: &Course,
        submitted_assignments: usize,
        now: DateTime<Utc>,
    ) -> ProgressBreakdown {
        let course_id = self.course_id;
        let cp = self
            .progress
            .get_or_insert_with(|| CourseProgress::new(course_id, now));
        let breakdown = progress::compute_weighted(course, cp, &self.quizzes, submitted_assignments);
        self.publish(&breakdown, now);
        breakdown
    }

    pub fn submit_quiz(
        &mut self,
        course: &Course,
        chapter_id: Uuid,
        answers: Vec<String>,
        submitted_assignments: usize,
        now: DateTime<Utc>,
    ) -> AppResult<QuizSubmissionResp> {
        let chapter = course
            .chapter(chapter_id)
            .filter(|ch| ch.has_quiz())
            .ok_or_else(|| AppError::not_found("Chapter or quiz not found"))?;
        self.ensure_enrolled()?;
        if let Some(existing) = self.quizzes.get(&chapter_id) {
            existing.restrictions.ensure_attempt_allowed(now)?;
        }

        let questions = chapter.quiz_questions();
        let grade = quiz::grade(&questions, &answers);

        let course_id = self.course_id;
        let qp = self
            .quizzes
            .entry(chapter_id)
            .or_insert_with(|| QuizProgress::new(course_id, chapter_id, now));
        qp.record(grade, answers, now);
        let attempts = qp.attempts.len();

        if grade.passed {
            self.progress_mut(now).complete_chapter(chapter_id);
            self.recompute(course, submitted_assignments, now);
        }

        Ok(QuizSubmissionResp {
            score: grade.score,
            passed: grade.passed,
            correct_answers: grade.correct,
            total_questions: grade.total,
            attempts,
        })
    }

    /// Explicit "lesson watched" report, dispatched on the identifier kind.
    pub fn mark_watched(
        &mut self,
        course: &Course,
        target: &LessonWatched,
        submitted_assignments: usize,
        now: DateTime<Utc>,
    ) -> AppResult<ProgressBreakdown> {
        tracing::debug!(mode = ?target.mode(), "lesson watched");
        match target {
            LessonWatched::Chapter(chapter_id) => {
                if !course.has_chapter(*chapter_id) {
                    return Err(AppError::not_found("Chapter not found"));
                }
                self.ensure_enrolled()?;
                self.progress_mut(now).complete_chapter(*chapter_id);
                Ok(self.recompute(course, submitted_assignments, now))
            }
            LessonWatched::Video(vimeo_id) => {
                let chapter = course
                    .chapter_for_video(vimeo_id)
                    .ok_or_else(|| AppError::not_found("Video not found"))?;
                self.ensure_enrolled()?;
                let cp = self.progress_mut(now);
                cp.completed_videos.insert(vimeo_id.clone());
                if chapter.video_ids().all(|id| cp.completed_videos.contains(id)) {
                    cp.complete_chapter(chapter.id);
                }
                let breakdown = progress::compute_video_count(course, cp);
                self.publish(&breakdown, now);
                Ok(breakdown)
            }
        }
    }

    pub fn record_watch_time(
        &mut self,
        course: &Course,
        chapter_id: Uuid,
        watch_time: f64,
        total_duration: Option<f64>,
        submitted_assignments: usize,
        now: DateTime<Utc>,
    ) -> AppResult<WatchTimeResp> {
        if !watch_time.is_finite() || watch_time < 0.0 {
            return Err(AppError::validation("watchTime must be a non-negative number"));
        }
        if total_duration.is_some_and(|t| !t.is_finite() || t < 0.0) {
            return Err(AppError::validation("totalDuration must be a non-negative number"));
        }
        if !course.has_chapter(chapter_id) {
            return Err(AppError::not_found("Chapter not found"));
        }
        self.ensure_enrolled()?;

        let report = self
            .progress_mut(now)
            .record_watch_time(chapter_id, watch_time, total_duration, now);
        if report.newly_completed {
            tracing::info!(%chapter_id, "chapter auto-completed from watch time");
            self.recompute(course, submitted_assignments, now);
        }

        let cp = self.progress_mut(now);
        Ok(WatchTimeResp {
            chapter_id,
            watch_time: report.watch.watch_time,
            watch_percentage: (report.watch.ratio() * 100.0).round() as i32,
            is_completed: cp.completed_chapters.contains(&chapter_id),
            overall_progress: cp.overall_progress,
        })
    }

    pub fn attempt_check(&self, chapter_id: Uuid, now: DateTime<Utc>) -> AttemptCheck {
        let restrictions = self
            .quizzes
            .get(&chapter_id)
            .map(|qp| (&qp.restrictions, qp.total_attempts));
        restriction::check_attempt_allowed(restrictions, now)
    }

    pub fn quiz_status(&self, chapter_id: Uuid) -> QuizStatusResp {
        match self.quizzes.get(&chapter_id) {
            None => QuizStatusResp {
                completed: false,
                attempts: 0,
                best_score: 0,
                passed: false,
                last_attempt_at: None,
                total_attempts: 0,
            },
            Some(qp) => QuizStatusResp {
                completed: !qp.attempts.is_empty(),
                attempts: qp.attempts.len(),
                best_score: qp.best_score,
                passed: qp.passed,
                last_attempt_at: Some(qp.last_attempt_at),
                total_attempts: qp.total_attempts,
            },
        }
    }

    pub fn snapshot(&self, course: &Course) -> CourseProgressResp {
        let mut quiz_progress: Vec<QuizProgress> = self.quizzes.values().cloned().collect();
        quiz_progress.sort_by_key(|qp| {
            course
                .chapters
                .iter()
                .position(|ch| ch.id == qp.chapter_id)
                .unwrap_or(usize::MAX)
        });

        let base = CourseProgressResp {
            course_id: course.id,
            completed_chapters: Vec::new(),
            completed_videos: Vec::new(),
            chapter_watch_times: Vec::new(),
            overall_progress: 0,
            total_chapters: course.chapters.len(),
            total_videos: course.total_videos(),
            total_duration_secs: course.total_duration_secs(),
            last_accessed_at: None,
            quiz_progress,
        };
        match &self.progress {
            None => base,
            Some(p) => CourseProgressResp {
                completed_chapters: p.completed_chapters.iter().copied().collect(),
                completed_videos: p.completed_videos.iter().cloned().collect(),
                chapter_watch_times: p.watch_times.values().copied().collect(),
                overall_progress: p.overall_progress,
                last_accessed_at: Some(p.last_accessed_at),
                ..base
            },
        }
    }

    /// Manual override of the enrollment's progress. Course progress is
    /// left untouched.
    pub fn override_progress(
        &mut self,
        progress: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ProgressOverrideResp> {
        let enrollment = self
            .enrollment
            .as_mut()
            .ok_or_else(|| AppError::not_found("Course not found in enrolled courses"))?;
        tracing::info!(course_id = %enrollment.course_id, progress, "manual progress override");
        let mut lifecycle = Lifecycle {
            enrollment,
            completion: &mut self.completion,
        };
        lifecycle.apply_progress(progress, now);
        Ok(ProgressOverrideResp {
            course_id: self.course_id,
            progress: lifecycle.enrollment.progress,
            last_accessed: now,
        })
    }

    pub fn mark_course_completed(&mut self, now: DateTime<Utc>) -> AppResult<CompletionResp> {
        let enrollment = self
            .enrollment
            .as_mut()
            .ok_or_else(|| AppError::not_found("Course not found in enrolled courses"))?;
        let completed_on = Lifecycle {
            enrollment,
            completion: &mut self.completion,
        }
        .mark_completed(now);
        Ok(CompletionResp {
            course_id: self.course_id,
            completed_on,
        })
    }
}
