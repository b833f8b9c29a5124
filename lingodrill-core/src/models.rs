use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

pub type CardId = Uuid;
pub type GroupId = Uuid;
pub type ReviewId = Uuid;
pub type EventId = Uuid;

pub const EF_MIN: f32 = 1.3;
pub const EF_MAX: f32 = 2.8;
pub const EF_DEFAULT: f32 = 2.5;
pub const INTERVAL_DEFAULT: u32 = 1;
pub const PILE_SIZE_DEFAULT: u32 = 10;
/// A hundred years; keeps `next_due` well inside chrono's range and `i32` columns.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

const SECS_PER_DAY: i64 = 86_400;

/// Partition key for every record: the owning user and the language they study.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub user_id: String,
    pub language_id: String,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, language_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            language_id: language_id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.language_id)
    }
}

/// Recall quality reported by the learner after a review.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Hard,
    Medium,
    Easy,
}

impl Quality {
    pub fn as_score(&self) -> i32 {
        match self {
            Quality::Hard => 1,
            Quality::Medium => 2,
            Quality::Easy => 3,
        }
    }

    pub fn from_score(score: i32) -> Option<Self> {
        match score {
            1 => Some(Quality::Hard),
            2 => Some(Quality::Medium),
            3 => Some(Quality::Easy),
            _ => None,
        }
    }

    /// Hard counts as a lapse.
    pub fn is_success(&self) -> bool {
        !matches!(self, Quality::Hard)
    }
}

impl FromStr for Quality {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "h" | "hard" => Ok(Quality::Hard),
            "2" | "m" | "med" | "medium" => Ok(Quality::Medium),
            "3" | "e" | "easy" => Ok(Quality::Easy),
            _ => Err(CoreError::Invalid("quality")),
        }
    }
}

/// Coarse bucket of a review state relative to "now".
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DueStatus {
    New,
    DueToday,
    Lapsed,
    Future,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Draft,
    Active,
    Archived,
    Deleted,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Draft => "draft",
            CardStatus::Active => "active",
            CardStatus::Archived => "archived",
            CardStatus::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(&self, to: CardStatus) -> bool {
        use CardStatus::*;
        matches!(
            (self, to),
            (Draft, Active)
                | (Draft, Deleted)
                | (Active, Archived)
                | (Active, Deleted)
                | (Archived, Active)
                | (Archived, Deleted)
        )
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CardStatus::Draft),
            "active" => Ok(CardStatus::Active),
            "archived" => Ok(CardStatus::Archived),
            "deleted" => Ok(CardStatus::Deleted),
            _ => Err(CoreError::Invalid("card status")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Word,
    Pattern,
    ComplexPrompt,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Word => "word",
            CardType::Pattern => "pattern",
            CardType::ComplexPrompt => "complex_prompt",
        }
    }
}

impl FromStr for CardType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "word" => Ok(CardType::Word),
            "pattern" => Ok(CardType::Pattern),
            "complex_prompt" => Ok(CardType::ComplexPrompt),
            _ => Err(CoreError::Invalid("card type")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }
}

impl FromStr for CefrLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A1" => Ok(CefrLevel::A1),
            "A2" => Ok(CefrLevel::A2),
            "B1" => Ok(CefrLevel::B1),
            "B2" => Ok(CefrLevel::B2),
            "C1" => Ok(CefrLevel::C1),
            "C2" => Ok(CefrLevel::C2),
            _ => Err(CoreError::Invalid("cefr level")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Card {
    #[serde(flatten)]
    pub scope: Scope,
    pub id: CardId,
    pub content: String,
    pub meaning: Option<String>,
    pub card_type: CardType,
    pub status: CardStatus,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub mnemonics: Vec<String>,
    pub llm_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(scope: Scope, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scope,
            id: Uuid::new_v4(),
            content: content.into(),
            meaning: None,
            card_type: CardType::Word,
            status: CardStatus::Active,
            examples: Vec::new(),
            mnemonics: Vec::new(),
            llm_instructions: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_meaning(mut self, meaning: impl Into<String>) -> Self {
        self.meaning = Some(meaning.into());
        self
    }

    pub fn with_status(mut self, status: CardStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == CardStatus::Active
    }

    /// Moves the card along its lifecycle, rejecting transitions the lifecycle does not allow.
    pub fn set_status(&mut self, to: CardStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidStatus {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    #[serde(flatten)]
    pub scope: Scope,
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    /// Case-insensitive name comparison with full Unicode folding, so "Ñoño" matches "ñOÑO".
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardGroup {
    #[serde(flatten)]
    pub scope: Scope,
    pub card_id: CardId,
    pub group_id: GroupId,
    pub assigned_at: DateTime<Utc>,
}

/// Spaced-repetition state of one card. Times are epoch seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReviewState {
    #[serde(flatten)]
    pub scope: Scope,
    pub card_id: CardId,
    pub next_due: i64,
    pub interval_days: u32,
    pub ease_factor: f32,
    pub review_count: u32,
    pub last_reviewed: Option<i64>,
}

impl ReviewState {
    /// A never-graded state, due immediately.
    pub fn new(scope: Scope, card_id: CardId, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            card_id,
            next_due: now.timestamp(),
            interval_days: INTERVAL_DEFAULT,
            ease_factor: EF_DEFAULT,
            review_count: 0,
            last_reviewed: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.review_count == 0
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due <= now.timestamp()
    }

    pub fn next_due_at(&self) -> DateTime<Utc> {
        epoch_to_datetime(self.next_due)
    }

    pub fn due_status(&self, now: DateTime<Utc>) -> DueStatus {
        if self.is_new() {
            DueStatus::New
        } else if self.next_due > now.timestamp() {
            DueStatus::Future
        } else if now.timestamp() - self.next_due >= SECS_PER_DAY {
            DueStatus::Lapsed
        } else {
            DueStatus::DueToday
        }
    }
}

pub fn epoch_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn days_to_secs(days: u32) -> i64 {
    i64::from(days) * SECS_PER_DAY
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: ReviewId,
    #[serde(flatten)]
    pub scope: Scope,
    pub card_id: CardId,
    pub quality: Quality,
    pub reviewed_at: DateTime<Utc>,
    pub interval_applied: u32,
    pub ease_after: f32,
}

impl Review {
    pub fn new(
        scope: Scope,
        card_id: CardId,
        quality: Quality,
        reviewed_at: DateTime<Utc>,
        interval_applied: u32,
        ease_after: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            card_id,
            quality,
            reviewed_at,
            interval_applied,
            ease_after,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DrillState {
    Active,
    Snoozed,
    Dismissed,
}

impl DrillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrillState::Active => "active",
            DrillState::Snoozed => "snoozed",
            DrillState::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for DrillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrillState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DrillState::Active),
            "snoozed" => Ok(DrillState::Snoozed),
            "dismissed" => Ok(DrillState::Dismissed),
            _ => Err(CoreError::Invalid("drill state")),
        }
    }
}

/// Where a drill-context entry came from. Stored as `manual` or `pile:<group id>`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "String", try_from = "String")]
pub enum Provenance {
    Manual,
    DrawPile(GroupId),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Manual => f.write_str("manual"),
            Provenance::DrawPile(id) => write!(f, "pile:{id}"),
        }
    }
}

impl FromStr for Provenance {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "manual" {
            return Ok(Provenance::Manual);
        }
        let id = s
            .strip_prefix("pile:")
            .ok_or(CoreError::Invalid("provenance"))?;
        Uuid::parse_str(id)
            .map(Provenance::DrawPile)
            .map_err(|_| CoreError::Invalid("provenance"))
    }
}

impl From<Provenance> for String {
    fn from(p: Provenance) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Provenance {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrillContextEntry {
    #[serde(flatten)]
    pub scope: Scope,
    pub card_id: CardId,
    pub state: DrillState,
    pub added_from: Provenance,
    pub added_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u32,
    pub state_until: Option<DateTime<Utc>>,
    pub cefr_override: Option<CefrLevel>,
}

impl DrillContextEntry {
    pub fn new(scope: Scope, card_id: CardId, added_from: Provenance, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            card_id,
            state: DrillState::Active,
            added_from,
            added_at: now,
            last_used: None,
            usage_count: 0,
            state_until: None,
            cefr_override: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == DrillState::Active
    }

    pub fn is_expired_snooze(&self, now: DateTime<Utc>) -> bool {
        self.state == DrillState::Snoozed && self.state_until.map_or(true, |until| until <= now)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawPile {
    #[serde(flatten)]
    pub scope: Scope,
    pub group_id: GroupId,
    pub enabled: bool,
    pub name: Option<String>,
    pub pile_size_limit: u32,
    pub created_at: DateTime<Utc>,
}

impl DrawPile {
    pub fn new(scope: Scope, group_id: GroupId) -> Self {
        Self {
            scope,
            group_id,
            enabled: true,
            name: None,
            pile_size_limit: PILE_SIZE_DEFAULT,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DrillEventKind {
    Drawn,
    Pinned,
    Snoozed,
    Woken,
    Dismissed,
    Readded,
    Used,
}

impl DrillEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrillEventKind::Drawn => "drawn",
            DrillEventKind::Pinned => "pinned",
            DrillEventKind::Snoozed => "snoozed",
            DrillEventKind::Woken => "woken",
            DrillEventKind::Dismissed => "dismissed",
            DrillEventKind::Readded => "readded",
            DrillEventKind::Used => "used",
        }
    }
}

impl FromStr for DrillEventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drawn" => Ok(DrillEventKind::Drawn),
            "pinned" => Ok(DrillEventKind::Pinned),
            "snoozed" => Ok(DrillEventKind::Snoozed),
            "woken" => Ok(DrillEventKind::Woken),
            "dismissed" => Ok(DrillEventKind::Dismissed),
            "readded" => Ok(DrillEventKind::Readded),
            "used" => Ok(DrillEventKind::Used),
            _ => Err(CoreError::Invalid("drill event kind")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrillEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub scope: Scope,
    pub card_id: CardId,
    pub kind: DrillEventKind,
    pub at: DateTime<Utc>,
}

impl DrillEvent {
    pub fn new(scope: Scope, card_id: CardId, kind: DrillEventKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            card_id,
            kind,
            at,
        }
    }
}

/// Row of the "cards due for review" scan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DueCard {
    pub card: Card,
    pub review: ReviewState,
}

/// Row of the "active drill context" scan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveDrillCard {
    pub card: Card,
    pub entry: DrillContextEntry,
}
