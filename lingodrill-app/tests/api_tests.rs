use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;

use lingodrill_app::api::server::router;
use lingodrill_core::memory::MemoryRepo;
use lingodrill_core::{service, Card, Repository, SchedulerConfig, Scope};

fn scope() -> Scope {
    Scope::new("ana", "es")
}

async fn seeded() -> (Arc<MemoryRepo>, Vec<Card>, uuid::Uuid) {
    let repo = Arc::new(MemoryRepo::new());
    let group = repo.create_group(&scope(), "Basics", None).await.unwrap();
    let mut cards = Vec::new();
    for word in ["hola", "adiós", "gracias"] {
        let card = repo.add_card(&Card::new(scope(), word)).await.unwrap();
        repo.assign_card(&scope(), card.id, group.id).await.unwrap();
        service::enroll_card(&*repo, &scope(), card.id, Utc::now()).await.unwrap();
        cards.push(card);
    }
    service::configure_pile(&*repo, &scope(), group.id, Some(true), Some(2), None)
        .await
        .unwrap();
    (repo, cards, group.id)
}

fn server(repo: Arc<MemoryRepo>) -> TestServer {
    TestServer::new(router(repo, SchedulerConfig::default())).unwrap()
}

#[tokio::test]
async fn due_then_review_reschedules() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo);

    let response = server.get("/u/ana/es/due").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 3);

    let response = server
        .post("/u/ana/es/review")
        .json(&json!({ "card_id": cards[0].id, "quality": "easy" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["interval_days"], 1);
    assert_eq!(body["review_count"], 1);

    let body: serde_json::Value = server.get("/u/ana/es/due").await.json();
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn review_of_unknown_card_is_404() {
    let (repo, _, _) = seeded().await;
    let server = server(repo);

    let response = server
        .post("/u/ana/es/review")
        .json(&json!({ "card_id": uuid::Uuid::new_v4(), "quality": "2" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn other_scope_sees_nothing() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo);

    let body: serde_json::Value = server.get("/u/ben/es/due").await.json();
    assert!(body.as_array().unwrap().is_empty());

    let response = server
        .post("/u/ben/es/review")
        .json(&json!({ "card_id": cards[0].id, "quality": "hard" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_quality_is_400() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo);

    let response = server
        .post("/u/ana/es/review")
        .json(&json!({ "card_id": cards[0].id, "quality": "perfect" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn draw_respects_pile_limit_and_dismiss_hides_card() {
    let (repo, _, group) = seeded().await;
    let server = server(repo);

    let response = server.post(&format!("/u/ana/es/drill/draw/{group}")).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let drawn = body["drawn"].as_array().unwrap().clone();
    assert_eq!(drawn.len(), 2);
    assert_eq!(drawn[0]["added_from"], format!("pile:{group}"));

    // Pile is full: drawing again adds nothing.
    let body: serde_json::Value = server
        .post(&format!("/u/ana/es/drill/draw/{group}"))
        .await
        .json();
    assert!(body["drawn"].as_array().unwrap().is_empty());
    assert_eq!(body["already_active"], 2);

    let card_id = drawn[0]["card_id"].clone();
    server
        .post("/u/ana/es/drill/dismiss")
        .json(&json!({ "card_id": card_id }))
        .await
        .assert_status_ok();

    let active: serde_json::Value = server.get("/u/ana/es/drill/active").await.json();
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_ne!(active[0]["card_id"], card_id);

    // Snoozing a dismissed card is a rejected transition.
    server
        .post("/u/ana/es/drill/snooze")
        .json(&json!({ "card_id": card_id, "hours": 2 }))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn snooze_requires_a_duration() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo);

    server
        .post("/u/ana/es/drill/pin")
        .json(&json!({ "card_id": cards[1].id }))
        .await
        .assert_status_ok();

    server
        .post("/u/ana/es/drill/snooze")
        .json(&json!({ "card_id": cards[1].id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .post("/u/ana/es/drill/snooze")
        .json(&json!({ "card_id": cards[1].id, "hours": 3 }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "snoozed");
}

#[tokio::test]
async fn snooze_hours_out_of_range_is_400() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo.clone());

    server
        .post("/u/ana/es/drill/pin")
        .json(&json!({ "card_id": cards[0].id }))
        .await
        .assert_status_ok();

    for hours in [i64::MAX, 9_000_000_000_000_000_000, i64::MIN] {
        let response = server
            .post("/u/ana/es/drill/snooze")
            .json(&json!({ "card_id": cards[0].id, "hours": hours }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "invalid");
    }

    let entry = repo.get_context_entry(&scope(), cards[0].id).await.unwrap().unwrap();
    assert!(entry.is_active());
}

#[tokio::test]
async fn usage_and_stats_are_reported() {
    let (repo, cards, _) = seeded().await;
    let server = server(repo);

    server
        .post("/u/ana/es/drill/pin")
        .json(&json!({ "card_id": cards[2].id }))
        .await
        .assert_status_ok();
    let body: serde_json::Value = server
        .post("/u/ana/es/drill/use")
        .json(&json!({ "card_id": cards[2].id }))
        .await
        .json();
    assert_eq!(body["usage_count"], 1);

    server
        .post("/u/ana/es/review")
        .json(&json!({ "card_id": cards[2].id, "quality": "medium" }))
        .await
        .assert_status_ok();

    let stats: serde_json::Value = server.get("/u/ana/es/stats").await.json();
    assert_eq!(stats["summary"]["reviews"]["total"], 1);
    assert_eq!(stats["summary"]["drill"]["pinned"], 1);
    assert_eq!(stats["summary"]["drill"]["used"], 1);
    assert_eq!(stats["streak_days"], 1);
}

#[tokio::test]
async fn group_rename_and_card_membership() {
    let (repo, cards, group) = seeded().await;
    repo.create_group(&scope(), "Ñandú", None).await.unwrap();
    let server = server(repo);

    let body: serde_json::Value = server
        .get(&format!("/u/ana/es/cards/{}/groups", cards[0].id))
        .await
        .json();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Basics");

    let response = server
        .patch(&format!("/u/ana/es/groups/{group}"))
        .json(&json!({ "name": "Saludos", "description": "greetings" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["name"], "Saludos");
    assert_eq!(body["description"], "greetings");

    server
        .patch(&format!("/u/ana/es/groups/{group}"))
        .json(&json!({ "name": "ñANDÚ" }))
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .patch(&format!("/u/ana/es/groups/{group}"))
        .json(&json!({ "name": "  " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get(&format!("/u/ana/es/cards/{}/groups", uuid::Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
