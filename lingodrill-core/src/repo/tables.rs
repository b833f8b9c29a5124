//! Plain in-process tables shared by the memory repo and the JSON file store.

use crate::{
    join_active_context, join_due, ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError,
    DrawPile, DrillContextEntry, DrillEvent, DrillState, DueCard, Group, GroupId, Review,
    ReviewState, Scope,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

type Key<T> = (Scope, T);

fn key<T>(scope: &Scope, id: T) -> Key<T> {
    (scope.clone(), id)
}

#[derive(Default, Clone, Debug)]
pub struct Tables {
    cards: HashMap<Key<CardId>, Card>,
    groups: HashMap<Key<GroupId>, Group>,
    memberships: HashMap<Key<(CardId, GroupId)>, CardGroup>,
    review_states: HashMap<Key<CardId>, ReviewState>,
    reviews: Vec<Review>,
    piles: HashMap<Key<GroupId>, DrawPile>,
    entries: HashMap<Key<CardId>, DrillContextEntry>,
    events: Vec<DrillEvent>,
}

/// Serializable flat form of [`Tables`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TablesImage {
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub memberships: Vec<CardGroup>,
    #[serde(default)]
    pub review_states: Vec<ReviewState>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub piles: Vec<DrawPile>,
    #[serde(default)]
    pub entries: Vec<DrillContextEntry>,
    #[serde(default)]
    pub events: Vec<DrillEvent>,
}

impl Tables {
    pub fn to_image(&self) -> TablesImage {
        let mut img = TablesImage {
            cards: self.cards.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
            memberships: self.memberships.values().cloned().collect(),
            review_states: self.review_states.values().cloned().collect(),
            reviews: self.reviews.clone(),
            piles: self.piles.values().cloned().collect(),
            entries: self.entries.values().cloned().collect(),
            events: self.events.clone(),
        };
        // Stable on-disk ordering keeps diffs between backups small.
        img.cards.sort_by_key(|c| (c.created_at, c.id));
        img.groups.sort_by_key(|g| (g.created_at, g.id));
        img.memberships.sort_by_key(|m| (m.assigned_at, m.card_id, m.group_id));
        img.review_states.sort_by_key(|s| s.card_id);
        img.piles.sort_by_key(|p| (p.created_at, p.group_id));
        img.entries.sort_by_key(|e| (e.added_at, e.card_id));
        img
    }

    pub fn from_image(img: TablesImage) -> Self {
        Self {
            cards: img.cards.into_iter().map(|c| (key(&c.scope, c.id), c)).collect(),
            groups: img.groups.into_iter().map(|g| (key(&g.scope, g.id), g)).collect(),
            memberships: img
                .memberships
                .into_iter()
                .map(|m| (key(&m.scope, (m.card_id, m.group_id)), m))
                .collect(),
            review_states: img
                .review_states
                .into_iter()
                .map(|s| (key(&s.scope, s.card_id), s))
                .collect(),
            reviews: img.reviews,
            piles: img.piles.into_iter().map(|p| (key(&p.scope, p.group_id), p)).collect(),
            entries: img.entries.into_iter().map(|e| (key(&e.scope, e.card_id), e)).collect(),
            events: img.events,
        }
    }

    fn scoped_cards<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a Card> + 'a {
        self.cards.values().filter(move |c| &c.scope == scope)
    }

    fn require_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        if self.cards.contains_key(&key(scope, id)) {
            Ok(())
        } else {
            Err(CoreError::NotFound("card"))
        }
    }

    fn require_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        if self.groups.contains_key(&key(scope, id)) {
            Ok(())
        } else {
            Err(CoreError::NotFound("group"))
        }
    }

    // ===== Cards =====
    pub fn add_card(&mut self, card: &Card) -> Result<Card, CoreError> {
        let k = key(&card.scope, card.id);
        if self.cards.contains_key(&k) {
            return Err(CoreError::Conflict("card id already exists"));
        }
        self.cards.insert(k, card.clone());
        Ok(card.clone())
    }

    pub fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError> {
        self.cards
            .get(&key(scope, id))
            .cloned()
            .ok_or(CoreError::NotFound("card"))
    }

    pub fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Vec<Card> {
        let mut v: Vec<Card> = self
            .scoped_cards(scope)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        v.sort_by_key(|c| (c.created_at, c.id));
        v
    }

    pub fn update_card(&mut self, card: &Card) -> Result<Card, CoreError> {
        let slot = self
            .cards
            .get_mut(&key(&card.scope, card.id))
            .ok_or(CoreError::NotFound("card"))?;
        *slot = card.clone();
        Ok(card.clone())
    }

    pub fn delete_card(&mut self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        self.cards
            .remove(&key(scope, id))
            .ok_or(CoreError::NotFound("card"))?;
        self.memberships
            .retain(|(s, (cid, _)), _| !(s == scope && *cid == id));
        self.review_states.remove(&key(scope, id));
        self.entries.remove(&key(scope, id));
        self.reviews.retain(|r| !(&r.scope == scope && r.card_id == id));
        self.events.retain(|e| !(&e.scope == scope && e.card_id == id));
        Ok(())
    }

    // ===== Groups =====
    pub fn create_group(
        &mut self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, CoreError> {
        if self.group_name_taken(scope, name, None) {
            return Err(CoreError::Conflict("group name already exists"));
        }
        let mut group = Group::new(scope.clone(), name);
        group.description = description.map(|s| s.to_string());
        self.groups.insert(key(scope, group.id), group.clone());
        Ok(group)
    }

    fn group_name_taken(&self, scope: &Scope, name: &str, except: Option<GroupId>) -> bool {
        self.groups
            .values()
            .any(|g| &g.scope == scope && Some(g.id) != except && g.name_matches(name))
    }

    /// Renames or re-describes a group; `created_at` is kept from the stored row.
    pub fn update_group(&mut self, group: &Group) -> Result<Group, CoreError> {
        self.require_group(&group.scope, group.id)?;
        if self.group_name_taken(&group.scope, &group.name, Some(group.id)) {
            return Err(CoreError::Conflict("group name already exists"));
        }
        let slot = self
            .groups
            .get_mut(&key(&group.scope, group.id))
            .ok_or(CoreError::NotFound("group"))?;
        slot.name = group.name.clone();
        slot.description = group.description.clone();
        Ok(slot.clone())
    }

    pub fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError> {
        self.groups
            .get(&key(scope, id))
            .cloned()
            .ok_or(CoreError::NotFound("group"))
    }

    pub fn list_groups(&self, scope: &Scope) -> Vec<Group> {
        let mut v: Vec<Group> = self
            .groups
            .values()
            .filter(|g| &g.scope == scope)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        v
    }

    pub fn delete_group(&mut self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        self.groups
            .remove(&key(scope, id))
            .ok_or(CoreError::NotFound("group"))?;
        self.memberships
            .retain(|(s, (_, gid)), _| !(s == scope && *gid == id));
        self.piles.remove(&key(scope, id));
        Ok(())
    }

    pub fn assign_card(
        &mut self,
        scope: &Scope,
        card_id: CardId,
        group_id: GroupId,
    ) -> Result<CardGroup, CoreError> {
        self.require_card(scope, card_id)?;
        self.require_group(scope, group_id)?;
        let k = key(scope, (card_id, group_id));
        if self.memberships.contains_key(&k) {
            return Err(CoreError::Conflict("card already in group"));
        }
        let m = CardGroup {
            scope: scope.clone(),
            card_id,
            group_id,
            assigned_at: Utc::now(),
        };
        self.memberships.insert(k, m.clone());
        Ok(m)
    }

    pub fn unassign_card(&mut self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError> {
        self.memberships
            .remove(&key(scope, (card_id, group_id)))
            .map(|_| ())
            .ok_or(CoreError::NotFound("membership"))
    }

    pub fn list_group_cards(&self, scope: &Scope, group_id: GroupId) -> Result<Vec<Card>, CoreError> {
        self.require_group(scope, group_id)?;
        let mut members: Vec<&CardGroup> = self
            .memberships
            .values()
            .filter(|m| &m.scope == scope && m.group_id == group_id)
            .collect();
        members.sort_by_key(|m| (m.assigned_at, m.card_id));
        Ok(members
            .into_iter()
            .filter_map(|m| self.cards.get(&key(scope, m.card_id)).cloned())
            .collect())
    }

    pub fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError> {
        self.require_card(scope, card_id)?;
        let mut v: Vec<Group> = self
            .memberships
            .values()
            .filter(|m| &m.scope == scope && m.card_id == card_id)
            .filter_map(|m| self.groups.get(&key(scope, m.group_id)).cloned())
            .collect();
        v.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(v)
    }

    // ===== Review scheduling =====
    pub fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Option<ReviewState> {
        self.review_states.get(&key(scope, card_id)).cloned()
    }

    pub fn save_review_state(&mut self, state: &ReviewState) -> Result<(), CoreError> {
        self.require_card(&state.scope, state.card_id)?;
        self.review_states
            .insert(key(&state.scope, state.card_id), state.clone());
        Ok(())
    }

    pub fn list_due(&self, scope: &Scope, now: DateTime<Utc>) -> Vec<DueCard> {
        join_due(
            self.scoped_cards(scope),
            self.review_states.values().filter(|s| &s.scope == scope),
            now,
        )
    }

    pub fn insert_review(&mut self, review: &Review) -> Result<(), CoreError> {
        self.require_card(&review.scope, review.card_id)?;
        self.reviews.push(review.clone());
        Ok(())
    }

    /// All-or-nothing: both rows are checked before either is written.
    pub fn record_grading(&mut self, state: &ReviewState, review: &Review) -> Result<(), CoreError> {
        self.require_card(&state.scope, state.card_id)?;
        self.require_card(&review.scope, review.card_id)?;
        self.save_review_state(state)?;
        self.insert_review(review)
    }

    pub fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Vec<Review> {
        let mut v: Vec<Review> = self
            .reviews
            .iter()
            .filter(|r| &r.scope == scope && card_id.map_or(true, |id| r.card_id == id))
            .cloned()
            .collect();
        v.sort_by_key(|r| r.reviewed_at);
        v
    }

    // ===== Drill context =====
    pub fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Option<DrawPile> {
        self.piles.get(&key(scope, group_id)).cloned()
    }

    pub fn save_draw_pile(&mut self, pile: &DrawPile) -> Result<(), CoreError> {
        self.require_group(&pile.scope, pile.group_id)?;
        self.piles.insert(key(&pile.scope, pile.group_id), pile.clone());
        Ok(())
    }

    pub fn list_draw_piles(&self, scope: &Scope) -> Vec<DrawPile> {
        let mut v: Vec<DrawPile> = self
            .piles
            .values()
            .filter(|p| &p.scope == scope)
            .cloned()
            .collect();
        v.sort_by_key(|p| (p.created_at, p.group_id));
        v
    }

    pub fn get_context_entry(&self, scope: &Scope, card_id: CardId) -> Option<DrillContextEntry> {
        self.entries.get(&key(scope, card_id)).cloned()
    }

    pub fn save_context_entry(&mut self, entry: &DrillContextEntry) -> Result<(), CoreError> {
        self.require_card(&entry.scope, entry.card_id)?;
        self.entries
            .insert(key(&entry.scope, entry.card_id), entry.clone());
        Ok(())
    }

    pub fn list_context(&self, scope: &Scope, state: Option<DrillState>) -> Vec<DrillContextEntry> {
        let mut v: Vec<DrillContextEntry> = self
            .entries
            .values()
            .filter(|e| &e.scope == scope && state.map_or(true, |s| e.state == s))
            .cloned()
            .collect();
        v.sort_by_key(|e| (e.added_at, e.card_id));
        v
    }

    pub fn list_active_context(&self, scope: &Scope) -> Vec<ActiveDrillCard> {
        join_active_context(
            self.scoped_cards(scope),
            self.entries.values().filter(|e| &e.scope == scope),
        )
    }

    pub fn insert_drill_event(&mut self, event: &DrillEvent) -> Result<(), CoreError> {
        self.require_card(&event.scope, event.card_id)?;
        self.events.push(event.clone());
        Ok(())
    }

    /// All-or-nothing: every referenced card is checked before anything is written.
    pub fn save_drill_changes(
        &mut self,
        entries: &[DrillContextEntry],
        events: &[DrillEvent],
    ) -> Result<(), CoreError> {
        for e in entries {
            self.require_card(&e.scope, e.card_id)?;
        }
        for e in events {
            self.require_card(&e.scope, e.card_id)?;
        }
        for e in entries {
            self.save_context_entry(e)?;
        }
        for e in events {
            self.insert_drill_event(e)?;
        }
        Ok(())
    }

    pub fn list_drill_events(&self, scope: &Scope) -> Vec<DrillEvent> {
        let mut v: Vec<DrillEvent> = self
            .events
            .iter()
            .filter(|e| &e.scope == scope)
            .cloned()
            .collect();
        v.sort_by_key(|e| e.at);
        v
    }
}
