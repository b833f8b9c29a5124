use chrono::{Duration, Utc};
use lingodrill_core::service::{
    configure_pile, dismiss_card, draw_all, draw_from_pile, enroll_card, grade_card, pin_card,
    readd_card, record_drill_use, set_card_status, snooze_card, wake_card,
};
use lingodrill_core::{
    memory::MemoryRepo, Card, CardStatus, CoreError, DrillContextEntry, DrillEvent,
    DrillEventKind, DrillState, Provenance, Quality, Repository, ReviewState, Review,
    SchedulerConfig, Scope,
};
use uuid::Uuid;

fn scope() -> Scope {
    Scope::new("lea", "fr")
}

async fn seeded(n: usize) -> (MemoryRepo, Uuid, Vec<Card>) {
    let repo = MemoryRepo::new();
    let group = repo.create_group(&scope(), "Verbs", None).await.unwrap();
    let mut cards = Vec::new();
    for i in 0..n {
        let c = repo
            .add_card(&Card::new(scope(), format!("verbe {i}")))
            .await
            .unwrap();
        repo.assign_card(&scope(), c.id, group.id).await.unwrap();
        cards.push(c);
    }
    (repo, group.id, cards)
}

#[tokio::test]
async fn grading_unknown_card_is_not_found() {
    let repo = MemoryRepo::new();
    let err = grade_card(
        &repo,
        &SchedulerConfig::default(),
        &scope(),
        Uuid::new_v4(),
        Quality::Easy,
        Utc::now(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, CoreError::NotFound("card")));
}

#[tokio::test]
async fn grading_clears_card_from_due_scan() {
    let (repo, _, cards) = seeded(2).await;
    let now = Utc::now();
    for c in &cards {
        enroll_card(&repo, &scope(), c.id, now).await.unwrap();
    }
    assert_eq!(repo.list_due(&scope(), now).await.unwrap().len(), 2);

    let out = grade_card(&repo, &SchedulerConfig::default(), &scope(), cards[0].id, Quality::Medium, now)
        .await
        .unwrap();
    assert_eq!(out.state.interval_days, 1);

    let due = repo.list_due(&scope(), now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].card.id, cards[1].id);

    let reviews = repo.list_reviews(&scope(), Some(cards[0].id)).await.unwrap();
    assert_eq!(reviews.len(), 1);

    // Comes back once its interval has passed.
    let later = now + Duration::days(2);
    assert_eq!(repo.list_due(&scope(), later).await.unwrap().len(), 2);
}

#[tokio::test]
async fn archived_cards_leave_the_due_scan() {
    let (repo, _, cards) = seeded(1).await;
    let now = Utc::now();
    enroll_card(&repo, &scope(), cards[0].id, now).await.unwrap();
    set_card_status(&repo, &scope(), cards[0].id, CardStatus::Archived, now)
        .await
        .unwrap();
    assert!(repo.list_due(&scope(), now).await.unwrap().is_empty());

    let err = set_card_status(&repo, &scope(), cards[0].id, CardStatus::Draft, now)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoreError::InvalidStatus { .. }));
}

#[tokio::test]
async fn draw_respects_limit_across_repeated_draws() {
    let (repo, group, _) = seeded(6).await;
    let now = Utc::now();
    configure_pile(&repo, &scope(), group, None, Some(4), Some("verbs".into()))
        .await
        .unwrap();

    let first = draw_from_pile(&repo, &scope(), group, now).await.unwrap();
    assert_eq!(first.drawn.len(), 4);
    let second = draw_from_pile(&repo, &scope(), group, now).await.unwrap();
    assert!(second.drawn.is_empty());
    assert_eq!(repo.list_active_context(&scope()).await.unwrap().len(), 4);

    let drawn_events = repo
        .list_drill_events(&scope())
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == DrillEventKind::Drawn)
        .count();
    assert_eq!(drawn_events, 4);
}

#[tokio::test]
async fn draw_without_pile_is_not_found() {
    let (repo, group, _) = seeded(1).await;
    let err = draw_from_pile(&repo, &scope(), group, Utc::now())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoreError::NotFound("draw pile")));
}

#[tokio::test]
async fn snooze_expiry_frees_a_slot_for_the_next_draw() {
    let (repo, group, _) = seeded(3).await;
    let now = Utc::now();
    configure_pile(&repo, &scope(), group, None, Some(2), None).await.unwrap();
    let first = draw_from_pile(&repo, &scope(), group, now).await.unwrap();
    let snoozed = first.drawn[0].card_id;

    snooze_card(&repo, &scope(), snoozed, now + Duration::hours(6), now)
        .await
        .unwrap();
    // The snooze frees one slot, taken by the undrawn third card.
    let refill = draw_from_pile(&repo, &scope(), group, now).await.unwrap();
    assert_eq!(refill.drawn.len(), 1);
    assert_ne!(refill.drawn[0].card_id, snoozed);

    // Once a slot opens after expiry, the snoozed card is drawn again.
    let other = refill.drawn[0].card_id;
    dismiss_card(&repo, &scope(), other, now).await.unwrap();
    let later = now + Duration::hours(7);
    let again = draw_from_pile(&repo, &scope(), group, later).await.unwrap();
    assert_eq!(again.drawn.len(), 1);
    assert_eq!(again.drawn[0].card_id, snoozed);
}

#[tokio::test]
async fn dismissed_entries_stay_out_until_readded() {
    let (repo, group, cards) = seeded(1).await;
    let now = Utc::now();
    configure_pile(&repo, &scope(), group, None, None, None).await.unwrap();
    draw_from_pile(&repo, &scope(), group, now).await.unwrap();

    dismiss_card(&repo, &scope(), cards[0].id, now).await.unwrap();
    assert!(repo.list_active_context(&scope()).await.unwrap().is_empty());
    let redraw = draw_from_pile(&repo, &scope(), group, now + Duration::days(30))
        .await
        .unwrap();
    assert!(redraw.drawn.is_empty());

    let e = readd_card(&repo, &scope(), cards[0].id, Provenance::DrawPile(group), now)
        .await
        .unwrap();
    assert_eq!(e.state, DrillState::Active);
    assert_eq!(repo.list_active_context(&scope()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pin_conflicts_on_active_entry() {
    let (repo, _, cards) = seeded(1).await;
    let now = Utc::now();
    pin_card(&repo, &scope(), cards[0].id, now).await.unwrap();
    let err = pin_card(&repo, &scope(), cards[0].id, now).await.err().unwrap();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn wake_and_use_update_entry() {
    let (repo, _, cards) = seeded(1).await;
    let now = Utc::now();
    let id = cards[0].id;
    pin_card(&repo, &scope(), id, now).await.unwrap();
    snooze_card(&repo, &scope(), id, now + Duration::days(1), now).await.unwrap();
    assert!(record_drill_use(&repo, &scope(), id, now).await.is_err());
    wake_card(&repo, &scope(), id, now).await.unwrap();
    let e = record_drill_use(&repo, &scope(), id, now).await.unwrap();
    assert_eq!(e.usage_count, 1);
    assert_eq!(e.last_used, Some(now));
}

#[tokio::test]
async fn draw_all_skips_disabled_piles() {
    let (repo, group, _) = seeded(2).await;
    let other = repo.create_group(&scope(), "Nouns", None).await.unwrap();
    let noun = repo.add_card(&Card::new(scope(), "maison")).await.unwrap();
    repo.assign_card(&scope(), noun.id, other.id).await.unwrap();

    configure_pile(&repo, &scope(), group, None, None, None).await.unwrap();
    configure_pile(&repo, &scope(), other.id, Some(false), None, None).await.unwrap();

    let drawn = draw_all(&repo, &scope(), Utc::now()).await.unwrap();
    assert_eq!(drawn.len(), 2);
    assert!(drawn.iter().all(|e| e.card_id != noun.id));
}

#[tokio::test]
async fn scopes_are_isolated() {
    let (repo, _, cards) = seeded(1).await;
    let other = Scope::new("lea", "de");
    let err = repo.get_card(&other, cards[0].id).await.err().unwrap();
    assert!(matches!(err, CoreError::NotFound("card")));
    assert!(repo.list_cards(&other, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn grading_batch_with_unknown_card_writes_nothing() {
    let (repo, _, cards) = seeded(1).await;
    let now = Utc::now();
    let state = ReviewState::new(scope(), cards[0].id, now);
    let stray = Review::new(scope(), Uuid::new_v4(), Quality::Easy, now, 1, 2.6);

    let err = repo.record_grading(&state, &stray).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    assert!(repo.get_review_state(&scope(), cards[0].id).await.unwrap().is_none());
    assert!(repo.list_reviews(&scope(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn drill_batch_is_all_or_nothing() {
    let (repo, _, cards) = seeded(2).await;
    let now = Utc::now();
    let entries: Vec<DrillContextEntry> = cards
        .iter()
        .map(|c| DrillContextEntry::new(scope(), c.id, Provenance::Manual, now))
        .collect();
    let events = vec![
        DrillEvent::new(scope(), cards[0].id, DrillEventKind::Pinned, now),
        DrillEvent::new(scope(), Uuid::new_v4(), DrillEventKind::Pinned, now),
    ];

    assert!(repo.save_drill_changes(&entries, &events).await.is_err());
    assert!(repo.list_context(&scope(), None).await.unwrap().is_empty());
    assert!(repo.list_drill_events(&scope()).await.unwrap().is_empty());

    repo.save_drill_changes(&entries, &events[..1]).await.unwrap();
    assert_eq!(repo.list_context(&scope(), None).await.unwrap().len(), 2);
    assert_eq!(repo.list_drill_events(&scope()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn groups_rename_and_list_per_card() {
    let (repo, group_id, cards) = seeded(1).await;
    let other = repo.create_group(&scope(), "Ñoño", Some("misc")).await.unwrap();
    repo.assign_card(&scope(), cards[0].id, other.id).await.unwrap();

    // Unicode case folding applies to uniqueness.
    let dup = repo.create_group(&scope(), "ñOÑO", None).await.unwrap_err();
    assert!(matches!(dup, CoreError::Conflict(_)));

    let mut verbs = repo.get_group(&scope(), group_id).await.unwrap();
    verbs.name = "ÑOÑO".into();
    assert!(matches!(repo.update_group(&verbs).await, Err(CoreError::Conflict(_))));

    verbs.name = "Verbes".into();
    verbs.description = Some("conjugation".into());
    let saved = repo.update_group(&verbs).await.unwrap();
    assert_eq!(saved.name, "Verbes");
    assert_eq!(saved.description.as_deref(), Some("conjugation"));

    // Changing only the case of its own name is not a clash.
    verbs.name = "VERBES".into();
    repo.update_group(&verbs).await.unwrap();

    let names: Vec<String> = repo
        .list_card_groups(&scope(), cards[0].id)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["VERBES".to_string(), "Ñoño".to_string()]);

    let missing = repo.list_card_groups(&scope(), Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, CoreError::NotFound(_)));
}
