//! Drill-context rotation: drawing cards from a group's pile into the active
//! working set, and the `active ⇄ snoozed → dismissed` entry lifecycle.

use crate::{Card, CardId, CoreError, DrawPile, DrillContextEntry, DrillState, Provenance};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct DrawOutcome {
    /// Entries that became active in this draw, ready to be persisted.
    pub drawn: Vec<DrillContextEntry>,
    /// Active entries the group already had before drawing.
    pub already_active: usize,
    /// Expired snoozes found by the sweep, drawn or not.
    pub expired_snoozes: usize,
}

/// Pulls cards from `group_cards` into active context up to the pile's limit.
///
/// `entries` are the scope's existing context entries; entries for cards
/// outside the group are ignored. A disabled or full pile draws nothing.
/// Dismissed entries are never drawn.
pub fn draw(
    pile: &DrawPile,
    group_cards: &[Card],
    entries: &[DrillContextEntry],
    now: DateTime<Utc>,
) -> DrawOutcome {
    let by_card: HashMap<CardId, &DrillContextEntry> =
        entries.iter().map(|e| (e.card_id, e)).collect();

    let mut outcome = DrawOutcome::default();
    let mut candidates: Vec<(&Card, Option<&DrillContextEntry>)> = Vec::new();

    for card in group_cards {
        match by_card.get(&card.id).copied() {
            Some(e) if e.is_active() => outcome.already_active += 1,
            Some(e) if e.is_expired_snooze(now) => {
                outcome.expired_snoozes += 1;
                if card.is_active() {
                    candidates.push((card, Some(e)));
                }
            }
            Some(_) => {}
            None if card.is_active() => candidates.push((card, None)),
            None => {}
        }
    }

    if !pile.enabled {
        return outcome;
    }
    let slots = (pile.pile_size_limit as usize).saturating_sub(outcome.already_active);
    if slots == 0 {
        return outcome;
    }

    candidates.sort_by_key(|(card, e)| (e.and_then(|e| e.last_used), card.id));

    let provenance = Provenance::DrawPile(pile.group_id);
    outcome.drawn = candidates
        .into_iter()
        .take(slots)
        .map(|(card, existing)| match existing {
            Some(e) => {
                let mut e = e.clone();
                e.state = DrillState::Active;
                e.state_until = None;
                e.added_from = provenance.clone();
                e.added_at = now;
                e
            }
            None => DrillContextEntry::new(card.scope.clone(), card.id, provenance.clone(), now),
        })
        .collect();

    outcome
}

/// `now + hours`, or `Invalid` when the result falls outside the calendar.
pub fn snooze_deadline(now: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>, CoreError> {
    Duration::try_hours(hours)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or(CoreError::Invalid("snooze hours out of range"))
}

impl DrillContextEntry {
    pub fn snooze(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.state != DrillState::Active {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                action: "snooze",
            });
        }
        if until <= now {
            return Err(CoreError::Invalid("snooze must end in the future"));
        }
        self.state = DrillState::Snoozed;
        self.state_until = Some(until);
        Ok(())
    }

    /// Ends a snooze early.
    pub fn wake(&mut self) -> Result<(), CoreError> {
        if self.state != DrillState::Snoozed {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                action: "wake",
            });
        }
        self.state = DrillState::Active;
        self.state_until = None;
        Ok(())
    }

    pub fn dismiss(&mut self) -> Result<(), CoreError> {
        if self.state == DrillState::Dismissed {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                action: "dismiss",
            });
        }
        self.state = DrillState::Dismissed;
        self.state_until = None;
        Ok(())
    }

    /// Brings a dismissed or snoozed entry back under a fresh provenance.
    pub fn readd(&mut self, provenance: Provenance, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.state == DrillState::Active {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                action: "re-add",
            });
        }
        self.state = DrillState::Active;
        self.state_until = None;
        self.added_from = provenance;
        self.added_at = now;
        Ok(())
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.state != DrillState::Active {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                action: "use",
            });
        }
        self.usage_count += 1;
        self.last_used = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scope;
    use uuid::Uuid;

    fn entry(now: DateTime<Utc>) -> DrillContextEntry {
        DrillContextEntry::new(Scope::new("u", "de"), Uuid::new_v4(), Provenance::Manual, now)
    }

    #[test]
    fn snooze_requires_future_expiry() {
        let now = Utc::now();
        let mut e = entry(now);
        assert!(matches!(e.snooze(now, now), Err(CoreError::Invalid(_))));
        assert!(e.is_active());
        e.snooze(now + Duration::hours(2), now).unwrap();
        assert_eq!(e.state, DrillState::Snoozed);
    }

    #[test]
    fn dismissed_is_terminal_for_everything_but_readd() {
        let now = Utc::now();
        let mut e = entry(now);
        e.dismiss().unwrap();
        assert!(e.dismiss().is_err());
        assert!(e.wake().is_err());
        assert!(e.record_use(now).is_err());
        assert!(e.snooze(now + Duration::days(1), now).is_err());

        let later = now + Duration::minutes(5);
        let group = Uuid::new_v4();
        e.readd(Provenance::DrawPile(group), later).unwrap();
        assert!(e.is_active());
        assert_eq!(e.added_from, Provenance::DrawPile(group));
        assert_eq!(e.added_at, later);
    }

    #[test]
    fn snooze_deadline_rejects_out_of_range_hours() {
        let now = Utc::now();
        assert_eq!(snooze_deadline(now, 3).unwrap(), now + Duration::hours(3));
        assert!(matches!(snooze_deadline(now, i64::MAX), Err(CoreError::Invalid(_))));
        assert!(matches!(
            snooze_deadline(now, 9_000_000_000_000_000_000),
            Err(CoreError::Invalid(_))
        ));
        // Representable as a duration but past the last date chrono can hold.
        assert!(matches!(snooze_deadline(now, 3_000_000_000), Err(CoreError::Invalid(_))));
    }

    #[test]
    fn wake_and_use() {
        let now = Utc::now();
        let mut e = entry(now);
        e.snooze(now + Duration::days(3), now).unwrap();
        e.wake().unwrap();
        assert_eq!(e.state_until, None);
        e.record_use(now).unwrap();
        e.record_use(now).unwrap();
        assert_eq!(e.usage_count, 2);
        assert_eq!(e.last_used, Some(now));
    }
}
