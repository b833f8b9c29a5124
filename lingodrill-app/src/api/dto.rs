use chrono::{DateTime, Utc};
use lingodrill_core::{
    ActiveDrillCard, DrawOutcome, DrillContextEntry, DueCard, Group, ScheduleOutcome, StatsSummary,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct DueCardOut {
    pub card_id: Uuid,
    pub content: String,
    pub meaning: Option<String>,
    pub next_due: DateTime<Utc>,
    pub interval_days: u32,
    pub ease_factor: f32,
    pub review_count: u32,
}

impl From<DueCard> for DueCardOut {
    fn from(d: DueCard) -> Self {
        Self {
            card_id: d.card.id,
            next_due: d.review.next_due_at(),
            content: d.card.content,
            meaning: d.card.meaning,
            interval_days: d.review.interval_days,
            ease_factor: d.review.ease_factor,
            review_count: d.review.review_count,
        }
    }
}

#[derive(Deserialize)]
pub struct ReviewIn {
    pub card_id: Uuid,
    /// `1|2|3` or `hard|medium|easy`
    pub quality: String,
}

#[derive(Serialize)]
pub struct ScheduleOut {
    pub card_id: Uuid,
    pub next_due: DateTime<Utc>,
    pub interval_days: u32,
    pub ease_factor: f32,
    pub review_count: u32,
}

impl From<ScheduleOutcome> for ScheduleOut {
    fn from(o: ScheduleOutcome) -> Self {
        Self {
            card_id: o.state.card_id,
            next_due: o.state.next_due_at(),
            interval_days: o.state.interval_days,
            ease_factor: o.state.ease_factor,
            review_count: o.state.review_count,
        }
    }
}

#[derive(Deserialize)]
pub struct CardRef {
    pub card_id: Uuid,
}

#[derive(Deserialize)]
pub struct SnoozeIn {
    pub card_id: Uuid,
    pub until: Option<DateTime<Utc>>,
    pub hours: Option<i64>,
}

#[derive(Serialize)]
pub struct EntryOut {
    pub card_id: Uuid,
    pub state: String,
    pub added_from: String,
    pub added_at: DateTime<Utc>,
    pub usage_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub state_until: Option<DateTime<Utc>>,
    pub cefr_override: Option<String>,
}

impl From<DrillContextEntry> for EntryOut {
    fn from(e: DrillContextEntry) -> Self {
        Self {
            card_id: e.card_id,
            state: e.state.as_str().to_string(),
            added_from: e.added_from.to_string(),
            added_at: e.added_at,
            usage_count: e.usage_count,
            last_used: e.last_used,
            state_until: e.state_until,
            cefr_override: e.cefr_override.map(|c| c.as_str().to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct ActiveCardOut {
    pub card_id: Uuid,
    pub content: String,
    pub meaning: Option<String>,
    pub card_type: String,
    pub examples: Vec<String>,
    pub entry: EntryOut,
}

impl From<ActiveDrillCard> for ActiveCardOut {
    fn from(a: ActiveDrillCard) -> Self {
        Self {
            card_id: a.card.id,
            content: a.card.content,
            meaning: a.card.meaning,
            card_type: a.card.card_type.as_str().to_string(),
            examples: a.card.examples,
            entry: a.entry.into(),
        }
    }
}

#[derive(Serialize)]
pub struct DrawOut {
    pub drawn: Vec<EntryOut>,
    pub already_active: usize,
    pub expired_snoozes: usize,
}

impl From<DrawOutcome> for DrawOut {
    fn from(o: DrawOutcome) -> Self {
        Self {
            drawn: o.drawn.into_iter().map(EntryOut::from).collect(),
            already_active: o.already_active,
            expired_snoozes: o.expired_snoozes,
        }
    }
}

#[derive(Serialize)]
pub struct StatsOut {
    pub summary: StatsSummary,
    pub streak_days: u32,
}

#[derive(Serialize)]
pub struct GroupOut {
    pub group_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Group> for GroupOut {
    fn from(g: Group) -> Self {
        Self {
            group_id: g.id,
            name: g.name,
            description: g.description,
            created_at: g.created_at,
        }
    }
}

/// Absent fields are left unchanged.
#[derive(Deserialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}
