use crate::{DrillEvent, DrillEventKind, Quality, Review};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReviewTotals {
    pub total: u32,
    pub hard: u32,
    pub medium: u32,
    pub easy: u32,
}

impl ReviewTotals {
    pub fn record(&mut self, q: Quality) {
        self.total += 1;
        match q {
            Quality::Hard => self.hard += 1,
            Quality::Medium => self.medium += 1,
            Quality::Easy => self.easy += 1,
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.medium + self.easy) as f32 / self.total as f32
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct DrillTotals {
    pub drawn: u32,
    pub pinned: u32,
    pub snoozed: u32,
    pub woken: u32,
    pub dismissed: u32,
    pub readded: u32,
    /// Sentences translated with a context card.
    pub used: u32,
}

impl DrillTotals {
    pub fn record(&mut self, kind: DrillEventKind) {
        let slot = match kind {
            DrillEventKind::Drawn => &mut self.drawn,
            DrillEventKind::Pinned => &mut self.pinned,
            DrillEventKind::Snoozed => &mut self.snoozed,
            DrillEventKind::Woken => &mut self.woken,
            DrillEventKind::Dismissed => &mut self.dismissed,
            DrillEventKind::Readded => &mut self.readded,
            DrillEventKind::Used => &mut self.used,
        };
        *slot += 1;
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DayStats {
    pub reviews: ReviewTotals,
    pub drill: DrillTotals,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsSummary {
    pub reviews: ReviewTotals,
    pub drill: DrillTotals,
    pub per_day: BTreeMap<NaiveDate, DayStats>,
}

pub fn summarize(reviews: &[Review], events: &[DrillEvent]) -> StatsSummary {
    let mut summary = StatsSummary::default();
    for r in reviews {
        summary.reviews.record(r.quality);
        let d = r.reviewed_at.date_naive();
        summary.per_day.entry(d).or_default().reviews.record(r.quality);
    }
    for e in events {
        summary.drill.record(e.kind);
        let d = e.at.date_naive();
        summary.per_day.entry(d).or_default().drill.record(e.kind);
    }
    summary
}

/// Consecutive days, ending today, with at least one review.
pub fn daily_streak(reviews: &[Review], today: NaiveDate) -> u32 {
    let per_day = summarize(reviews, &[]).per_day;
    let mut streak = 0u32;
    let mut day = today;
    while per_day.get(&day).map(|t| t.reviews.total > 0).unwrap_or(false) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}
