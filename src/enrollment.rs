use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CompletedCourseRow, EnrolledCourseRow, EnrollmentRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    NotStarted,
    Active,
    Completed,
}

impl EnrollmentState {
    pub fn from_progress(progress: i32) -> Self {
        match progress {
            p if p >= 100 => Self::Completed,
            p if p > 0 => Self::Active,
            _ => Self::NotStarted,
        }
    }
}

impl std::fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub course_id: Uuid,
    /// Free enrollments are not purchased.
    pub purchased: bool,
    pub progress: i32,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn from_row(row: EnrollmentRow) -> Self {
        Self {
            course_id: row.course_id,
            purchased: row.purchased,
            progress: row.progress,
            last_accessed: row.last_accessed,
        }
    }

    pub fn state(&self) -> EnrollmentState {
        EnrollmentState::from_progress(self.progress)
    }

    pub fn set_progress(&mut self, progress: i32, now: DateTime<Utc>) {
        self.progress = progress.clamp(0, 100);
        self.last_accessed = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCourse {
    pub course_id: Uuid,
    pub completed_on: DateTime<Utc>,
    pub certificate_id: Option<Uuid>,
}

impl From<CompletedCourseRow> for CompletedCourse {
    fn from(row: CompletedCourseRow) -> Self {
        Self {
            course_id: row.course_id,
            completed_on: row.completed_on,
            certificate_id: row.certificate_id,
        }
    }
}

/// Completion state of one enrollment: the record plus the student's
/// completed-course entry for the same course.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    pub enrollment: &'a mut Enrollment,
    pub completion: &'a mut Option<CompletedCourse>,
}

impl Lifecycle<'_> {
    /// Mirrors a computed or manually set progress value. Reaching 100
    /// records the completion if it is not recorded yet.
    pub fn apply_progress(&mut self, progress: i32, now: DateTime<Utc>) {
        let before = self.enrollment.state();
        self.enrollment.set_progress(progress, now);
        if self.enrollment.state() == EnrollmentState::Completed && self.completion.is_none() {
            self.record_completion(now);
        }
        if before != self.enrollment.state() {
            tracing::info!(
                course_id = %self.enrollment.course_id,
                from = %before,
                to = %self.enrollment.state(),
                "enrollment state changed"
            );
        }
    }

    /// Forces completion. An existing entry gets a fresh timestamp.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.enrollment.set_progress(100, now);
        self.record_completion(now);
        now
    }

    fn record_completion(&mut self, now: DateTime<Utc>) {
        if let Some(existing) = self.completion.as_mut() {
            existing.completed_on = now;
        } else {
            *self.completion = Some(CompletedCourse {
                course_id: self.enrollment.course_id,
                completed_on: now,
                certificate_id: None,
            });
        }
        tracing::info!(course_id = %self.enrollment.course_id, "course completion recorded");
    }
}

pub fn validate_progress(progress: Option<i32>) -> Result<i32, AppError> {
    match progress {
        Some(p) if (0..=100).contains(&p) => Ok(p),
        Some(_) => Err(AppError::validation("Progress must be between 0 and 100")),
        None => Err(AppError::validation("Course ID and progress are required")),
    }
}

// --- reporting ---

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourse {
    pub course_id: Uuid,
    pub title: String,
    pub progress: i32,
    pub state: EnrollmentState,
    pub purchased_at: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub payment_amount: Option<f64>,
    pub is_purchased: bool,
    pub total_duration: i64,
    pub total_chapters: i64,
}

impl From<EnrolledCourseRow> for EnrolledCourse {
    fn from(row: EnrolledCourseRow) -> Self {
        Self {
            course_id: row.course_id,
            title: row.title,
            progress: row.progress,
            state: EnrollmentState::from_progress(row.progress),
            purchased_at: row.purchased_at,
            last_accessed: row.last_accessed,
            payment_amount: row.payment_amount,
            is_purchased: row.purchased,
            total_duration: row.total_duration,
            total_chapters: row.total_chapters,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    pub not_started: usize,
    pub total_investment: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourses {
    pub all: Vec<EnrolledCourse>,
    /// Active courses followed by not-started ones.
    pub active: Vec<EnrolledCourse>,
    pub completed: Vec<EnrolledCourse>,
    pub not_started: Vec<EnrolledCourse>,
    pub stats: EnrollmentStats,
}

pub fn bucket(all: Vec<EnrolledCourse>) -> EnrolledCourses {
    let by_state = |state: EnrollmentState| -> Vec<EnrolledCourse> {
        all.iter().filter(|c| c.state == state).cloned().collect()
    };
    let completed = by_state(EnrollmentState::Completed);
    let mut active = by_state(EnrollmentState::Active);
    let not_started = by_state(EnrollmentState::NotStarted);

    let stats = EnrollmentStats {
        total: all.len(),
        completed: completed.len(),
        active: active.len(),
        not_started: not_started.len(),
        total_investment: all
            .iter()
            .filter(|c| c.is_purchased)
            .filter_map(|c| c.payment_amount)
            .sum(),
    };
    active.extend(not_started.iter().cloned());

    EnrolledCourses {
        all,
        active,
        completed,
        not_started,
        stats,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentPurchase {
    pub course_id: Uuid,
    pub title: String,
    pub amount: Option<f64>,
    pub purchase_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentStats {
    pub total_investment: f64,
    pub course_count: usize,
    pub recent_purchases: Vec<RecentPurchase>,
}

pub const RECENT_PURCHASES: usize = 5;

pub fn investment_stats(courses: &[EnrolledCourse]) -> InvestmentStats {
    let mut purchased: Vec<&EnrolledCourse> = courses.iter().filter(|c| c.is_purchased).collect();
    purchased.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
    InvestmentStats {
        total_investment: purchased.iter().filter_map(|c| c.payment_amount).sum(),
        course_count: purchased.len(),
        recent_purchases: purchased
            .iter()
            .take(RECENT_PURCHASES)
            .map(|c| RecentPurchase {
                course_id: c.course_id,
                title: c.title.clone(),
                amount: c.payment_amount,
                purchase_date: c.purchased_at,
            })
            .collect(),
    }
}
