use chrono::{Duration, Utc};
use lingodrill_core::{
    daily_streak, filter_by_due, filter_by_status, filter_by_text, join_due, summarize, Card,
    CardStatus, DrillEvent, DrillEventKind, DueStatus, Quality, Review, ReviewState, Scope,
};

fn scope() -> Scope {
    Scope::new("ana", "es")
}

#[test]
fn filters_text_and_status() {
    let c1 = Card::new(scope(), "hola").with_meaning("hello");
    let mut c2 = Card::new(scope(), "adiós").with_meaning("goodbye");
    c2.examples = vec!["Adiós, amigo".into()];
    let c3 = Card::new(scope(), "gracias").with_status(CardStatus::Draft);

    let v = vec![c1.clone(), c2.clone(), c3.clone()];

    let by_text = filter_by_text(&v, "HOL");
    assert_eq!(by_text.len(), 1);
    assert_eq!(by_text[0].content, "hola");
    assert_eq!(filter_by_text(&v, "amigo")[0].id, c2.id);
    assert_eq!(filter_by_text(&v, "  ").len(), 3);

    let drafts = filter_by_status(&v, CardStatus::Draft);
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].id, c3.id);
}

#[test]
fn filters_due() {
    let now = Utc::now();
    let card = Card::new(scope(), "hola");
    let new_state = ReviewState::new(scope(), card.id, now);

    let mut due_today = ReviewState::new(scope(), card.id, now);
    due_today.review_count = 3;
    due_today.next_due = now.timestamp() - 60;

    let mut lapsed = due_today.clone();
    lapsed.next_due = (now - Duration::days(3)).timestamp();

    let mut future = due_today.clone();
    future.next_due = (now + Duration::days(2)).timestamp();

    let v = vec![new_state, due_today, lapsed, future];
    assert_eq!(filter_by_due(&v, now, DueStatus::New).len(), 1);
    assert_eq!(filter_by_due(&v, now, DueStatus::DueToday).len(), 1);
    assert_eq!(filter_by_due(&v, now, DueStatus::Lapsed).len(), 1);
    assert_eq!(filter_by_due(&v, now, DueStatus::Future).len(), 1);
}

#[test]
fn due_scan_orders_by_next_due_and_skips_inactive() {
    let now = Utc::now();
    let a = Card::new(scope(), "a");
    let b = Card::new(scope(), "b");
    let archived = Card::new(scope(), "c").with_status(CardStatus::Archived);

    let mut sa = ReviewState::new(scope(), a.id, now);
    sa.next_due = now.timestamp() - 10;
    let mut sb = ReviewState::new(scope(), b.id, now);
    sb.next_due = now.timestamp() - 500;
    let sc = ReviewState::new(scope(), archived.id, now);
    let mut later = ReviewState::new(scope(), a.id, now);
    later.next_due = now.timestamp() + 10;

    let due = join_due(&[a.clone(), b.clone(), archived], &[sa, sb, sc], now);
    let ids: Vec<_> = due.iter().map(|d| d.card.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);

    assert!(join_due(&[a], &[later], now).is_empty());
}

#[test]
fn stats_and_streak() {
    let card = Card::new(scope(), "hola");
    let now = Utc::now();

    let r0 = Review::new(scope(), card.id, Quality::Easy, now - Duration::days(2), 1, 2.6);
    let r1 = Review::new(scope(), card.id, Quality::Medium, now - Duration::days(1), 6, 2.6);
    let r2 = Review::new(scope(), card.id, Quality::Hard, now, 1, 2.46);
    let events = vec![
        DrillEvent::new(scope(), card.id, DrillEventKind::Drawn, now),
        DrillEvent::new(scope(), card.id, DrillEventKind::Used, now),
        DrillEvent::new(scope(), card.id, DrillEventKind::Used, now),
    ];

    let s = summarize(&[r0.clone(), r1.clone(), r2.clone()], &events);
    assert_eq!(s.reviews.total, 3);
    assert_eq!(s.reviews.hard, 1);
    assert!((s.reviews.accuracy() - 2.0 / 3.0).abs() < 1e-6);
    assert_eq!(s.drill.drawn, 1);
    assert_eq!(s.drill.used, 2);

    let today = now.date_naive();
    assert_eq!(s.per_day[&today].drill.used, 2);
    assert_eq!(daily_streak(&[r0, r1, r2], today), 3);
}
