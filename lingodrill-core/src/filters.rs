use crate::{
    ActiveDrillCard, Card, CardId, CardStatus, DrillContextEntry, DrillState, DueCard, DueStatus,
    ReviewState,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub fn filter_by_text(cards: &[Card], query: &str) -> Vec<Card> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return cards.to_vec();
    }
    cards
        .iter()
        .filter(|c| {
            c.content.to_lowercase().contains(&q)
                || c.meaning
                    .as_ref()
                    .map(|m| m.to_lowercase().contains(&q))
                    .unwrap_or(false)
                || c.examples.iter().any(|x| x.to_lowercase().contains(&q))
        })
        .cloned()
        .collect()
}

pub fn filter_by_status(cards: &[Card], status: CardStatus) -> Vec<Card> {
    cards.iter().filter(|c| c.status == status).cloned().collect()
}

pub fn filter_by_due(states: &[ReviewState], now: DateTime<Utc>, want: DueStatus) -> Vec<ReviewState> {
    states
        .iter()
        .filter(|s| s.due_status(now) == want)
        .cloned()
        .collect()
}

/// Active cards with `next_due <= now`, most overdue first.
pub fn join_due<'a>(
    cards: impl IntoIterator<Item = &'a Card>,
    states: impl IntoIterator<Item = &'a ReviewState>,
    now: DateTime<Utc>,
) -> Vec<DueCard> {
    let by_id: HashMap<CardId, &Card> = cards
        .into_iter()
        .filter(|c| c.is_active())
        .map(|c| (c.id, c))
        .collect();
    let mut due: Vec<DueCard> = states
        .into_iter()
        .filter(|s| s.is_due(now))
        .filter_map(|s| {
            by_id.get(&s.card_id).map(|c| DueCard {
                card: (*c).clone(),
                review: s.clone(),
            })
        })
        .collect();
    due.sort_by_key(|d| (d.review.next_due, d.card.created_at));
    due
}

/// Active cards whose context entry is `active`, oldest additions first.
pub fn join_active_context<'a>(
    cards: impl IntoIterator<Item = &'a Card>,
    entries: impl IntoIterator<Item = &'a DrillContextEntry>,
) -> Vec<ActiveDrillCard> {
    let by_id: HashMap<CardId, &Card> = cards
        .into_iter()
        .filter(|c| c.is_active())
        .map(|c| (c.id, c))
        .collect();
    let mut active: Vec<ActiveDrillCard> = entries
        .into_iter()
        .filter(|e| e.state == DrillState::Active)
        .filter_map(|e| {
            by_id.get(&e.card_id).map(|c| ActiveDrillCard {
                card: (*c).clone(),
                entry: e.clone(),
            })
        })
        .collect();
    active.sort_by_key(|a| (a.entry.added_at, a.card.id));
    active
}
