use chrono::{Duration, Utc};
use lingodrill_core::{
    draw, join_active_context, Card, CardStatus, DrawPile, DrillContextEntry, DrillState,
    Provenance, Scope,
};
use uuid::Uuid;

fn scope() -> Scope {
    Scope::new("kim", "ko")
}

fn cards(n: usize) -> Vec<Card> {
    (0..n).map(|i| Card::new(scope(), format!("word {i}"))).collect()
}

fn pile(limit: u32) -> DrawPile {
    let mut p = DrawPile::new(scope(), Uuid::new_v4());
    p.pile_size_limit = limit;
    p
}

#[test]
fn draw_fills_up_to_limit() {
    let p = pile(3);
    let group = cards(5);
    let out = draw(&p, &group, &[], Utc::now());
    assert_eq!(out.drawn.len(), 3);
    for e in &out.drawn {
        assert_eq!(e.state, DrillState::Active);
        assert_eq!(e.added_from, Provenance::DrawPile(p.group_id));
    }
}

#[test]
fn draw_counts_existing_active_entries() {
    let now = Utc::now();
    let p = pile(3);
    let group = cards(5);
    let existing: Vec<DrillContextEntry> = group[..2]
        .iter()
        .map(|c| DrillContextEntry::new(scope(), c.id, Provenance::Manual, now))
        .collect();

    let out = draw(&p, &group, &existing, now);
    assert_eq!(out.already_active, 2);
    assert_eq!(out.drawn.len(), 1);
    assert!(existing.iter().all(|e| out.drawn.iter().all(|d| d.card_id != e.card_id)));
}

#[test]
fn full_or_disabled_pile_is_a_noop() {
    let now = Utc::now();
    let group = cards(4);
    let existing: Vec<DrillContextEntry> = group
        .iter()
        .take(2)
        .map(|c| DrillContextEntry::new(scope(), c.id, Provenance::Manual, now))
        .collect();

    let full = pile(2);
    assert!(draw(&full, &group, &existing, now).drawn.is_empty());

    let mut off = pile(10);
    off.enabled = false;
    assert!(draw(&off, &group, &[], now).drawn.is_empty());
}

#[test]
fn snoozed_and_dismissed_are_skipped_until_expiry() {
    let now = Utc::now();
    let p = pile(10);
    let group = cards(3);

    let mut snoozed = DrillContextEntry::new(scope(), group[0].id, Provenance::Manual, now);
    snoozed.snooze(now + Duration::days(1), now).unwrap();
    let mut dismissed = DrillContextEntry::new(scope(), group[1].id, Provenance::Manual, now);
    dismissed.dismiss().unwrap();
    let entries = vec![snoozed.clone(), dismissed];

    let out = draw(&p, &group, &entries, now);
    let ids: Vec<_> = out.drawn.iter().map(|e| e.card_id).collect();
    assert_eq!(ids, vec![group[2].id]);

    // Two days later the snooze has lapsed and the card is eligible again.
    let later = now + Duration::days(2);
    let out = draw(&p, &group, &entries, later);
    assert_eq!(out.expired_snoozes, 1);
    let ids: Vec<_> = out.drawn.iter().map(|e| e.card_id).collect();
    assert!(ids.contains(&group[0].id));
    assert!(!ids.contains(&group[1].id));
    let revived = out.drawn.iter().find(|e| e.card_id == group[0].id).unwrap();
    assert_eq!(revived.state_until, None);
    assert_eq!(revived.state, DrillState::Active);
    assert_eq!(revived.added_at, later);
    assert_eq!(revived.added_from, Provenance::DrawPile(p.group_id));
}

#[test]
fn inactive_cards_are_never_drawn() {
    let p = pile(10);
    let mut group = cards(3);
    group[0].status = CardStatus::Draft;
    group[1].status = CardStatus::Archived;
    let out = draw(&p, &group, &[], Utc::now());
    assert_eq!(out.drawn.len(), 1);
    assert_eq!(out.drawn[0].card_id, group[2].id);
}

#[test]
fn least_recently_used_drawn_first() {
    let now = Utc::now();
    let p = pile(1);
    let group = cards(2);

    let mut used = DrillContextEntry::new(scope(), group[0].id, Provenance::Manual, now);
    used.record_use(now).unwrap();
    used.snooze(now + Duration::hours(1), now).unwrap();
    let mut used_later = DrillContextEntry::new(scope(), group[1].id, Provenance::Manual, now);
    used_later.record_use(now + Duration::minutes(30)).unwrap();
    used_later.snooze(now + Duration::hours(1), now).unwrap();

    let out = draw(&p, &group, &[used_later, used], now + Duration::hours(2));
    assert_eq!(out.drawn.len(), 1);
    assert_eq!(out.drawn[0].card_id, group[0].id);
    assert_eq!(out.drawn[0].usage_count, 1);
}

#[test]
fn active_context_excludes_dismissed_and_snoozed() {
    let now = Utc::now();
    let group = cards(3);
    let active = DrillContextEntry::new(scope(), group[0].id, Provenance::Manual, now);
    let mut snoozed = DrillContextEntry::new(scope(), group[1].id, Provenance::Manual, now);
    snoozed.snooze(now + Duration::days(1), now).unwrap();
    let mut dismissed = DrillContextEntry::new(scope(), group[2].id, Provenance::Manual, now);
    dismissed.dismiss().unwrap();

    let rows = join_active_context(&group, &[active, snoozed, dismissed]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].card.id, group[0].id);
}

#[test]
fn provenance_round_trips_through_text() {
    let g = Uuid::new_v4();
    let p: Provenance = format!("pile:{g}").parse().unwrap();
    assert_eq!(p, Provenance::DrawPile(g));
    assert_eq!("manual".parse::<Provenance>().unwrap(), Provenance::Manual);
    assert!("pile:nope".parse::<Provenance>().is_err());
    assert_eq!(serde_json::to_string(&p).unwrap(), format!("\"pile:{g}\""));
}
