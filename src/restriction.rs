//! Retry restrictions on chapter quizzes.
//!
//! A quiz is either unrestricted or cooling down. Failing with four or more
//! recorded attempts arms a 24 hour cooldown; passing clears it. Expiry is
//! evaluated lazily whenever the state is queried.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::error::AppError;

/// Failures at or beyond this attempt count arm the cooldown.
pub const COOLDOWN_AFTER_ATTEMPTS: usize = 4;
pub const COOLDOWN_HOURS: i64 = 24;

pub fn cooldown() -> Duration {
    Duration::hours(COOLDOWN_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionStatus {
    Unrestricted,
    CoolingDown { until: DateTime<Utc> },
}

/// Levers stored with every quiz progress record. Only the cooldown is
/// enforced; the others are carried so an extended policy can use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionLever {
    TimeCooldown,
    MustReWatchVideo,
    InstructorApproval,
}

impl RestrictionLever {
    pub fn is_enforced(self) -> bool {
        matches!(self, Self::TimeCooldown)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorApproval {
    pub required: bool,
    pub granted: bool,
    pub granted_at: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Restrictions {
    pub next_attempt_allowed_at: Option<DateTime<Utc>>,
    pub must_re_watch_video: bool,
    pub video_re_watched_at: Option<DateTime<Utc>>,
    pub instructor_approval: InstructorApproval,
}

impl Restrictions {
    pub fn status(&self, now: DateTime<Utc>) -> RestrictionStatus {
        match self.next_attempt_allowed_at {
            Some(until) if now < until => RestrictionStatus::CoolingDown { until },
            _ => RestrictionStatus::Unrestricted,
        }
    }

    /// Levers currently set on this record, enforced or not.
    pub fn active_levers(&self, now: DateTime<Utc>) -> Vec<RestrictionLever> {
        let mut levers = Vec::new();
        if matches!(self.status(now), RestrictionStatus::CoolingDown { .. }) {
            levers.push(RestrictionLever::TimeCooldown);
        }
        if self.must_re_watch_video {
            levers.push(RestrictionLever::MustReWatchVideo);
        }
        if self.instructor_approval.required && !self.instructor_approval.granted {
            levers.push(RestrictionLever::InstructorApproval);
        }
        levers
    }

    /// Transition after an attempt has been appended. `total_attempts`
    /// already includes that attempt.
    pub fn apply_outcome(&mut self, passed: bool, total_attempts: usize, now: DateTime<Utc>) {
        if passed {
            if self.next_attempt_allowed_at.take().is_some() {
                tracing::info!("quiz cooldown cleared after pass");
            }
        } else if total_attempts >= COOLDOWN_AFTER_ATTEMPTS {
            let until = now + cooldown();
            tracing::info!(total_attempts, %until, "quiz cooldown armed");
            self.next_attempt_allowed_at = Some(until);
        }
    }

    /// Refuses a new attempt while an enforced lever is active.
    pub fn ensure_attempt_allowed(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        let blocked = self
            .active_levers(now)
            .into_iter()
            .any(RestrictionLever::is_enforced);
        match (blocked, self.next_attempt_allowed_at) {
            (true, Some(until)) => Err(AppError::RestrictionActive {
                next_attempt_allowed_at: until,
                hours_remaining: hours_remaining(until, now),
            }),
            _ => Ok(()),
        }
    }
}

/// Whole hours until `until`, rounded up.
pub fn hours_remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    let hour = Duration::hours(1).num_milliseconds();
    (millis + hour - 1) / hour
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    TimeRestriction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptCheck {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub restrictions: AttemptRestrictions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRestrictions {
    pub total_attempts: usize,
    pub next_attempt_allowed_at: Option<DateTime<Utc>>,
    pub must_re_watch_video: bool,
    pub instructor_approval_required: bool,
    /// Hours until the cooldown ends, rounded up.
    pub time_remaining: i64,
}

/// Answers "may this student attempt the quiz now?". `None` means the
/// student has never attempted it.
pub fn check_attempt_allowed(
    restrictions: Option<(&Restrictions, usize)>,
    now: DateTime<Utc>,
) -> AttemptCheck {
    let mut check = AttemptCheck {
        allowed: true,
        reason: None,
        restrictions: AttemptRestrictions {
            total_attempts: 0,
            next_attempt_allowed_at: None,
            must_re_watch_video: false,
            instructor_approval_required: false,
            time_remaining: 0,
        },
    };

    let Some((r, total_attempts)) = restrictions else {
        return check;
    };
    check.restrictions.total_attempts = total_attempts;
    check.restrictions.must_re_watch_video = r.must_re_watch_video;
    check.restrictions.instructor_approval_required = r.instructor_approval.required;

    if let RestrictionStatus::CoolingDown { until } = r.status(now) {
        check.allowed = false;
        check.reason = Some(DenialReason::TimeRestriction);
        check.restrictions.next_attempt_allowed_at = Some(until);
        check.restrictions.time_remaining = hours_remaining(until, now);
    }
    check
}
