use crate::{
    ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError, DrawPile, DrillContextEntry,
    DrillEvent, DrillState, DueCard, Group, GroupId, Review, ReviewState, Scope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod tables;

/// Scope-keyed persistence. Every read and write is addressed by
/// `(user_id, language_id, id)`; records of other scopes are invisible.
#[async_trait]
pub trait Repository: Send + Sync {
    // Cards
    async fn add_card(&self, card: &Card) -> Result<Card, CoreError>;
    async fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError>;
    async fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Result<Vec<Card>, CoreError>;
    async fn update_card(&self, card: &Card) -> Result<Card, CoreError>;
    /// Removes the card with its memberships, review state, logs, and drill entry.
    async fn delete_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError>;

    // Groups
    async fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, CoreError>;
    async fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError>;
    async fn list_groups(&self, scope: &Scope) -> Result<Vec<Group>, CoreError>;
    /// Writes `name` and `description`; names stay unique per scope, ignoring case.
    async fn update_group(&self, group: &Group) -> Result<Group, CoreError>;
    async fn delete_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError>;
    async fn assign_card(
        &self,
        scope: &Scope,
        card_id: CardId,
        group_id: GroupId,
    ) -> Result<CardGroup, CoreError>;
    async fn unassign_card(&self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError>;
    async fn list_group_cards(&self, scope: &Scope, group_id: GroupId) -> Result<Vec<Card>, CoreError>;
    async fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError>;

    // Review scheduling
    async fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Result<Option<ReviewState>, CoreError>;
    async fn save_review_state(&self, state: &ReviewState) -> Result<(), CoreError>;
    async fn list_due(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Vec<DueCard>, CoreError>;
    async fn insert_review(&self, review: &Review) -> Result<(), CoreError>;
    /// Stores a graded state and its review log row in one unit; neither is kept if the other fails.
    async fn record_grading(&self, state: &ReviewState, review: &Review) -> Result<(), CoreError>;
    async fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Result<Vec<Review>, CoreError>;

    // Drill context
    async fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Result<Option<DrawPile>, CoreError>;
    async fn save_draw_pile(&self, pile: &DrawPile) -> Result<(), CoreError>;
    async fn list_draw_piles(&self, scope: &Scope) -> Result<Vec<DrawPile>, CoreError>;
    async fn get_context_entry(
        &self,
        scope: &Scope,
        card_id: CardId,
    ) -> Result<Option<DrillContextEntry>, CoreError>;
    async fn save_context_entry(&self, entry: &DrillContextEntry) -> Result<(), CoreError>;
    async fn list_context(
        &self,
        scope: &Scope,
        state: Option<DrillState>,
    ) -> Result<Vec<DrillContextEntry>, CoreError>;
    async fn list_active_context(&self, scope: &Scope) -> Result<Vec<ActiveDrillCard>, CoreError>;
    async fn insert_drill_event(&self, event: &DrillEvent) -> Result<(), CoreError>;
    /// Stores context entries and their events in one unit.
    async fn save_drill_changes(
        &self,
        entries: &[DrillContextEntry],
        events: &[DrillEvent],
    ) -> Result<(), CoreError>;
    async fn list_drill_events(&self, scope: &Scope) -> Result<Vec<DrillEvent>, CoreError>;
}
