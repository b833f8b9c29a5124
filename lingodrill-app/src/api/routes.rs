use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use lingodrill_core::{rotation, service, stats, Quality, Repository, SchedulerConfig, Scope};

use crate::api::dto::{
    ActiveCardOut, CardRef, DrawOut, DueCardOut, EntryOut, GroupOut, GroupPatch, ReviewIn,
    ScheduleOut, SnoozeIn, StatsOut,
};
use crate::api::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub cfg: SchedulerConfig,
}

#[derive(Deserialize)]
pub struct DueQuery {
    max: Option<usize>,
}

fn scope((user, lang): (String, String)) -> Scope {
    Scope::new(user, lang)
}

pub async fn due_cards(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Query(q): Query<DueQuery>,
) -> ApiResult<Json<Vec<DueCardOut>>> {
    let mut due = st.repo.list_due(&scope(p), Utc::now()).await?;
    if let Some(m) = q.max {
        due.truncate(m);
    }
    Ok(Json(due.into_iter().map(DueCardOut::from).collect()))
}

pub async fn post_review(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<ReviewIn>,
) -> ApiResult<Json<ScheduleOut>> {
    let quality = body.quality.parse::<Quality>()?;
    let out = service::grade_card(&*st.repo, &st.cfg, &scope(p), body.card_id, quality, Utc::now()).await?;
    Ok(Json(out.into()))
}

pub async fn card_groups(
    State(st): State<Arc<AppState>>,
    Path((user, lang, card)): Path<(String, String, Uuid)>,
) -> ApiResult<Json<Vec<GroupOut>>> {
    let groups = st.repo.list_card_groups(&scope((user, lang)), card).await?;
    Ok(Json(groups.into_iter().map(GroupOut::from).collect()))
}

pub async fn patch_group(
    State(st): State<Arc<AppState>>,
    Path((user, lang, group)): Path<(String, String, Uuid)>,
    Json(body): Json<GroupPatch>,
) -> ApiResult<Json<GroupOut>> {
    let mut g = st.repo.get_group(&scope((user, lang)), group).await?;
    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("group name must not be empty".into()));
        }
        g.name = name;
    }
    if body.description.is_some() {
        g.description = body.description;
    }
    Ok(Json(st.repo.update_group(&g).await?.into()))
}

pub async fn active_context(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
) -> ApiResult<Json<Vec<ActiveCardOut>>> {
    let active = st.repo.list_active_context(&scope(p)).await?;
    Ok(Json(active.into_iter().map(ActiveCardOut::from).collect()))
}

pub async fn draw(
    State(st): State<Arc<AppState>>,
    Path((user, lang, group)): Path<(String, String, Uuid)>,
) -> ApiResult<Json<DrawOut>> {
    let out = service::draw_from_pile(&*st.repo, &scope((user, lang)), group, Utc::now()).await?;
    Ok(Json(out.into()))
}

pub async fn snooze(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<SnoozeIn>,
) -> ApiResult<Json<EntryOut>> {
    let now = Utc::now();
    let until = match (body.until, body.hours) {
        (Some(t), _) => t,
        (None, Some(h)) => rotation::snooze_deadline(now, h)?,
        (None, None) => return Err(ApiError::BadRequest("snooze needs `until` or `hours`".into())),
    };
    let e = service::snooze_card(&*st.repo, &scope(p), body.card_id, until, now).await?;
    Ok(Json(e.into()))
}

pub async fn wake(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<CardRef>,
) -> ApiResult<Json<EntryOut>> {
    let e = service::wake_card(&*st.repo, &scope(p), body.card_id, Utc::now()).await?;
    Ok(Json(e.into()))
}

pub async fn dismiss(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<CardRef>,
) -> ApiResult<Json<EntryOut>> {
    let e = service::dismiss_card(&*st.repo, &scope(p), body.card_id, Utc::now()).await?;
    Ok(Json(e.into()))
}

pub async fn pin(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<CardRef>,
) -> ApiResult<Json<EntryOut>> {
    let e = service::pin_card(&*st.repo, &scope(p), body.card_id, Utc::now()).await?;
    Ok(Json(e.into()))
}

pub async fn record_use(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
    Json(body): Json<CardRef>,
) -> ApiResult<Json<EntryOut>> {
    let e = service::record_drill_use(&*st.repo, &scope(p), body.card_id, Utc::now()).await?;
    Ok(Json(e.into()))
}

pub async fn get_stats(
    State(st): State<Arc<AppState>>,
    Path(p): Path<(String, String)>,
) -> ApiResult<Json<StatsOut>> {
    let scope = scope(p);
    let reviews = st.repo.list_reviews(&scope, None).await?;
    let events = st.repo.list_drill_events(&scope).await?;
    Ok(Json(StatsOut {
        summary: stats::summarize(&reviews, &events),
        streak_days: stats::daily_streak(&reviews, Utc::now().date_naive()),
    }))
}
