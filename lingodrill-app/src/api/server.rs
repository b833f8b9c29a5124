use axum::{
    routing::{get, patch, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::routes::{
    active_context, card_groups, dismiss, draw, due_cards, get_stats, patch_group, pin,
    post_review, record_use, snooze, wake, AppState,
};
use lingodrill_core::{Repository, SchedulerConfig};

pub fn router(repo: Arc<dyn Repository>, cfg: SchedulerConfig) -> Router {
    let state = Arc::new(AppState { repo, cfg });

    Router::new()
        .route("/u/:user/:lang/due", get(due_cards))
        .route("/u/:user/:lang/review", post(post_review))
        .route("/u/:user/:lang/cards/:card/groups", get(card_groups))
        .route("/u/:user/:lang/groups/:group", patch(patch_group))
        .route("/u/:user/:lang/drill/active", get(active_context))
        .route("/u/:user/:lang/drill/draw/:group", post(draw))
        .route("/u/:user/:lang/drill/snooze", post(snooze))
        .route("/u/:user/:lang/drill/wake", post(wake))
        .route("/u/:user/:lang/drill/dismiss", post(dismiss))
        .route("/u/:user/:lang/drill/pin", post(pin))
        .route("/u/:user/:lang/drill/use", post(record_use))
        .route("/u/:user/:lang/stats", get(get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(repo: Arc<dyn Repository>, cfg: SchedulerConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(repo, cfg);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
