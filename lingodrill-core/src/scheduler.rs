use crate::{
    days_to_secs, Quality, Review, ReviewState, EF_DEFAULT, EF_MAX, EF_MIN, MAX_INTERVAL_DAYS,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunables of the graduated-interval scheduler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub initial_ease: f32,
    /// Never honoured below [`EF_MIN`].
    pub min_ease: f32,
    pub max_ease: f32,
    pub first_interval_days: u32,
    pub graduating_interval_days: u32,
    pub easy_bonus: f32,
    /// Upper bound on any scheduled interval.
    pub max_interval_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_ease: EF_DEFAULT,
            min_ease: EF_MIN,
            max_ease: EF_MAX,
            first_interval_days: 1,
            graduating_interval_days: 6,
            easy_bonus: 1.3,
            max_interval_days: MAX_INTERVAL_DAYS,
        }
    }
}

#[derive(Debug)]
pub struct ScheduleOutcome {
    pub state: ReviewState,
    pub review: Review,
}

impl SchedulerConfig {
    fn clamp_ef(&self, x: f32) -> f32 {
        let lo = self.min_ease.max(EF_MIN);
        let hi = self.max_ease.max(lo);
        if x.is_nan() {
            return lo;
        }
        x.clamp(lo, hi)
    }

    fn next_interval(&self, state: &ReviewState, quality: Quality, ef: f32) -> u32 {
        let cap = self.max_interval_days.clamp(1, MAX_INTERVAL_DAYS);
        let first = self.first_interval_days.clamp(1, cap);
        if state.is_new() || !quality.is_success() {
            return first;
        }
        if state.interval_days <= first {
            return self
                .graduating_interval_days
                .max(first.saturating_add(1))
                .min(cap);
        }
        let bonus = if quality == Quality::Easy {
            self.easy_bonus
        } else {
            1.0
        };
        // f32 -> u32 saturates, so the product cannot wrap before the cap.
        let grown = (state.interval_days as f32 * ef * bonus).round() as u32;
        grown.max(state.interval_days.saturating_add(1)).min(cap)
    }

    /// Applies one grading event. Every call advances the state; callers dedupe replays.
    pub fn grade(&self, mut state: ReviewState, quality: Quality, now: DateTime<Utc>) -> ScheduleOutcome {
        let g = quality.as_score();

        let base_ef = if state.is_new() {
            self.initial_ease
        } else {
            state.ease_factor
        };
        let new_ef = {
            let delta = 0.1 - (3 - g) as f32 * (0.08 + (3 - g) as f32 * 0.02);
            self.clamp_ef(base_ef + delta)
        };
        let new_interval = self.next_interval(&state, quality, new_ef);

        let at = now.timestamp();
        state.ease_factor = new_ef;
        state.interval_days = new_interval;
        state.review_count += 1;
        state.next_due = at + days_to_secs(new_interval);
        state.last_reviewed = Some(at);

        let review = Review::new(
            state.scope.clone(),
            state.card_id,
            quality,
            now,
            new_interval,
            new_ef,
        );

        ScheduleOutcome { state, review }
    }
}

/// Grades with the default configuration.
pub fn grade(state: ReviewState, quality: Quality, now: DateTime<Utc>) -> ScheduleOutcome {
    SchedulerConfig::default().grade(state, quality, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scope;
    use uuid::Uuid;

    fn fresh(now: DateTime<Utc>) -> ReviewState {
        ReviewState::new(Scope::new("u", "es"), Uuid::new_v4(), now)
    }

    #[test]
    fn nan_ease_is_clamped_to_floor() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.clamp_ef(f32::NAN), EF_MIN);
    }

    #[test]
    fn misconfigured_floor_is_raised() {
        let cfg = SchedulerConfig {
            min_ease: 0.5,
            max_ease: 0.4,
            ..Default::default()
        };
        assert_eq!(cfg.clamp_ef(0.1), EF_MIN);
        assert_eq!(cfg.clamp_ef(9.0), EF_MIN);
    }

    #[test]
    fn graduation_after_first_success() {
        let now = Utc::now();
        let s1 = grade(fresh(now), Quality::Medium, now).state;
        let s2 = grade(s1, Quality::Medium, now).state;
        assert_eq!(s2.interval_days, 6);
        assert_eq!(s2.review_count, 2);
    }

    #[test]
    fn easy_grows_faster_than_medium() {
        let now = Utc::now();
        let mut s = fresh(now);
        s.review_count = 4;
        s.interval_days = 10;
        let medium = grade(s.clone(), Quality::Medium, now).state;
        let easy = grade(s, Quality::Easy, now).state;
        assert!(easy.interval_days > medium.interval_days);
        assert!(medium.interval_days > 10);
    }

    #[test]
    fn interval_stops_at_configured_cap() {
        let cfg = SchedulerConfig {
            max_interval_days: 30,
            ..Default::default()
        };
        let now = Utc::now();
        let mut s = fresh(now);
        for _ in 0..10 {
            s = cfg.grade(s, Quality::Easy, now).state;
        }
        assert_eq!(s.interval_days, 30);
    }

    #[test]
    fn cap_above_hard_limit_is_lowered() {
        let cfg = SchedulerConfig {
            max_interval_days: u32::MAX,
            ..Default::default()
        };
        let now = Utc::now();
        let mut s = fresh(now);
        s.review_count = 9;
        s.interval_days = u32::MAX - 1;
        let out = cfg.grade(s, Quality::Easy, now).state;
        assert_eq!(out.interval_days, MAX_INTERVAL_DAYS);
    }
}
