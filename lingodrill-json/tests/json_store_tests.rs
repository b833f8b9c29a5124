use std::sync::Arc;

use chrono::Utc;
use lingodrill_core::service::{configure_pile, draw_from_pile, grade_card};
use lingodrill_core::{Card, CoreError, Quality, Repository, SchedulerConfig, Scope};
use lingodrill_json::JsonStore;

fn scope() -> Scope {
    Scope::new("noa", "he")
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let backups = dir.path().join("backups");
    let now = Utc::now();

    let (card_id, group_id) = {
        let store = JsonStore::open_with(file.clone(), backups.clone(), 3).await.unwrap();
        let card = store.add_card(&Card::new(scope(), "shalom")).await.unwrap();
        let group = store.create_group(&scope(), "Greetings", Some("basics")).await.unwrap();
        store.assign_card(&scope(), card.id, group.id).await.unwrap();
        grade_card(&store, &SchedulerConfig::default(), &scope(), card.id, Quality::Easy, now)
            .await
            .unwrap();
        configure_pile(&store, &scope(), group.id, None, Some(5), None).await.unwrap();
        draw_from_pile(&store, &scope(), group.id, now).await.unwrap();
        (card.id, group.id)
    };

    let store = JsonStore::open_with(file, backups.clone(), 3).await.unwrap();
    let state = store.get_review_state(&scope(), card_id).await.unwrap().unwrap();
    assert_eq!(state.review_count, 1);
    assert_eq!(state.interval_days, 1);
    assert_eq!(store.list_reviews(&scope(), None).await.unwrap().len(), 1);

    let pile = store.get_draw_pile(&scope(), group_id).await.unwrap().unwrap();
    assert_eq!(pile.pile_size_limit, 5);
    let active = store.list_active_context(&scope()).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].card.content, "shalom");

    let kept = std::fs::read_dir(&backups).unwrap().count();
    assert!(kept >= 1 && kept <= 3);
}

#[tokio::test]
async fn failed_mutation_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let store = JsonStore::open_with(file.clone(), dir.path().join("b"), 2).await.unwrap();
    store.create_group(&scope(), "Nouns", None).await.unwrap();
    assert!(store.create_group(&scope(), "nouns", None).await.is_err());

    let reopened = JsonStore::open_with(file, dir.path().join("b"), 2).await.unwrap();
    assert_eq!(reopened.list_groups(&scope()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_write_rolls_back_memory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let backups = dir.path().join("b");
    let store = JsonStore::open_with(file.clone(), backups.clone(), 2).await.unwrap();
    let kept = store.add_card(&Card::new(scope(), "toda")).await.unwrap();

    // A plain file where the backups dir should be makes every write fail.
    std::fs::remove_dir_all(&backups).unwrap();
    std::fs::write(&backups, b"not a dir").unwrap();

    let lost = Card::new(scope(), "bevakasha");
    assert!(matches!(store.add_card(&lost).await, Err(CoreError::Storage(_))));
    assert!(matches!(store.get_card(&scope(), lost.id).await, Err(CoreError::NotFound(_))));
    assert_eq!(store.list_cards(&scope(), None).await.unwrap().len(), 1);

    std::fs::remove_file(&backups).unwrap();
    let reopened = JsonStore::open_with(file, backups, 2).await.unwrap();
    let cards = reopened.list_cards(&scope(), None).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].id, kept.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_all_reach_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let backups = dir.path().join("b");
    let store = Arc::new(JsonStore::open_with(file.clone(), backups.clone(), 2).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.add_card(&Card::new(scope(), format!("mila {i}"))).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    drop(store);

    let reopened = JsonStore::open_with(file, backups, 2).await.unwrap();
    assert_eq!(reopened.list_cards(&scope(), None).await.unwrap().len(), 16);
}
