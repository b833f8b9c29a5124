use crate::repo::tables::Tables;
use crate::{
    ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError, DrawPile, DrillContextEntry,
    DrillEvent, DrillState, DueCard, Group, GroupId, Review, ReviewState, Scope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Default)]
pub struct MemoryRepo {
    tables: RwLock<Tables>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::repo::Repository for MemoryRepo {
    async fn add_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.tables.write().add_card(card)
    }

    async fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError> {
        self.tables.read().get_card(scope, id)
    }

    async fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Result<Vec<Card>, CoreError> {
        Ok(self.tables.read().list_cards(scope, status))
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.tables.write().update_card(card)
    }

    async fn delete_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        self.tables.write().delete_card(scope, id)
    }

    async fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, CoreError> {
        self.tables.write().create_group(scope, name, description)
    }

    async fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError> {
        self.tables.read().get_group(scope, id)
    }

    async fn list_groups(&self, scope: &Scope) -> Result<Vec<Group>, CoreError> {
        Ok(self.tables.read().list_groups(scope))
    }

    async fn update_group(&self, group: &Group) -> Result<Group, CoreError> {
        self.tables.write().update_group(group)
    }

    async fn delete_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        self.tables.write().delete_group(scope, id)
    }

    async fn assign_card(
        &self,
        scope: &Scope,
        card_id: CardId,
        group_id: GroupId,
    ) -> Result<CardGroup, CoreError> {
        self.tables.write().assign_card(scope, card_id, group_id)
    }

    async fn unassign_card(&self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError> {
        self.tables.write().unassign_card(scope, card_id, group_id)
    }

    async fn list_group_cards(&self, scope: &Scope, group_id: GroupId) -> Result<Vec<Card>, CoreError> {
        self.tables.read().list_group_cards(scope, group_id)
    }

    async fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError> {
        self.tables.read().list_card_groups(scope, card_id)
    }

    async fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Result<Option<ReviewState>, CoreError> {
        Ok(self.tables.read().get_review_state(scope, card_id))
    }

    async fn save_review_state(&self, state: &ReviewState) -> Result<(), CoreError> {
        self.tables.write().save_review_state(state)
    }

    async fn list_due(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Vec<DueCard>, CoreError> {
        Ok(self.tables.read().list_due(scope, now))
    }

    async fn insert_review(&self, review: &Review) -> Result<(), CoreError> {
        self.tables.write().insert_review(review)
    }

    async fn record_grading(&self, state: &ReviewState, review: &Review) -> Result<(), CoreError> {
        self.tables.write().record_grading(state, review)
    }

    async fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Result<Vec<Review>, CoreError> {
        Ok(self.tables.read().list_reviews(scope, card_id))
    }

    async fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Result<Option<DrawPile>, CoreError> {
        Ok(self.tables.read().get_draw_pile(scope, group_id))
    }

    async fn save_draw_pile(&self, pile: &DrawPile) -> Result<(), CoreError> {
        self.tables.write().save_draw_pile(pile)
    }

    async fn list_draw_piles(&self, scope: &Scope) -> Result<Vec<DrawPile>, CoreError> {
        Ok(self.tables.read().list_draw_piles(scope))
    }

    async fn get_context_entry(
        &self,
        scope: &Scope,
        card_id: CardId,
    ) -> Result<Option<DrillContextEntry>, CoreError> {
        Ok(self.tables.read().get_context_entry(scope, card_id))
    }

    async fn save_context_entry(&self, entry: &DrillContextEntry) -> Result<(), CoreError> {
        self.tables.write().save_context_entry(entry)
    }

    async fn list_context(
        &self,
        scope: &Scope,
        state: Option<DrillState>,
    ) -> Result<Vec<DrillContextEntry>, CoreError> {
        Ok(self.tables.read().list_context(scope, state))
    }

    async fn list_active_context(&self, scope: &Scope) -> Result<Vec<ActiveDrillCard>, CoreError> {
        Ok(self.tables.read().list_active_context(scope))
    }

    async fn insert_drill_event(&self, event: &DrillEvent) -> Result<(), CoreError> {
        self.tables.write().insert_drill_event(event)
    }

    async fn save_drill_changes(
        &self,
        entries: &[DrillContextEntry],
        events: &[DrillEvent],
    ) -> Result<(), CoreError> {
        self.tables.write().save_drill_changes(entries, events)
    }

    async fn list_drill_events(&self, scope: &Scope) -> Result<Vec<DrillEvent>, CoreError> {
        Ok(self.tables.read().list_drill_events(scope))
    }
}
