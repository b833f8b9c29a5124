//! Read-modify-write operations over a [`Repository`]. Each one loads what it
//! needs, applies a pure transition, persists the result, and logs it.

use crate::{
    rotation, CardId, CardStatus, CefrLevel, CoreError, CoreResult, DrawOutcome, DrawPile,
    DrillContextEntry, DrillEvent, DrillEventKind, DrillState, GroupId, Provenance, Quality,
    Repository, ReviewState, ScheduleOutcome, SchedulerConfig, Scope, Card,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub async fn set_card_status<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    to: CardStatus,
    now: DateTime<Utc>,
) -> CoreResult<Card> {
    let mut card = repo.get_card(scope, card_id).await?;
    if let Err(e) = card.set_status(to, now) {
        warn!(%scope, %card_id, error = %e, "rejected card status change");
        return Err(e);
    }
    let card = repo.update_card(&card).await?;
    info!(%scope, %card_id, status = %card.status, "card status changed");
    Ok(card)
}

/// Returns the card's review state, creating a fresh one due `now` if it has none.
pub async fn enroll_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    now: DateTime<Utc>,
) -> CoreResult<ReviewState> {
    repo.get_card(scope, card_id).await?;
    if let Some(state) = repo.get_review_state(scope, card_id).await? {
        return Ok(state);
    }
    let state = ReviewState::new(scope.clone(), card_id, now);
    repo.save_review_state(&state).await?;
    debug!(%scope, %card_id, "card enrolled for review");
    Ok(state)
}

pub async fn grade_card<R: Repository + ?Sized>(
    repo: &R,
    cfg: &SchedulerConfig,
    scope: &Scope,
    card_id: CardId,
    quality: Quality,
    now: DateTime<Utc>,
) -> CoreResult<ScheduleOutcome> {
    let card = repo.get_card(scope, card_id).await?;
    if !card.is_active() {
        return Err(CoreError::Invalid("only active cards can be graded"));
    }
    let state = repo
        .get_review_state(scope, card_id)
        .await?
        .unwrap_or_else(|| ReviewState::new(scope.clone(), card_id, now));

    let out = cfg.grade(state, quality, now);
    repo.record_grading(&out.state, &out.review).await?;
    info!(
        %scope,
        %card_id,
        ?quality,
        interval_days = out.state.interval_days,
        ease_factor = out.state.ease_factor,
        "card graded"
    );
    Ok(out)
}

/// Creates or updates the draw pile of a group. `None` leaves a setting unchanged.
pub async fn configure_pile<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    group_id: GroupId,
    enabled: Option<bool>,
    pile_size_limit: Option<u32>,
    name: Option<String>,
) -> CoreResult<DrawPile> {
    repo.get_group(scope, group_id).await?;
    let mut pile = repo
        .get_draw_pile(scope, group_id)
        .await?
        .unwrap_or_else(|| DrawPile::new(scope.clone(), group_id));
    if let Some(enabled) = enabled {
        pile.enabled = enabled;
    }
    if let Some(limit) = pile_size_limit {
        pile.pile_size_limit = limit;
    }
    if name.is_some() {
        pile.name = name;
    }
    repo.save_draw_pile(&pile).await?;
    info!(%scope, %group_id, enabled = pile.enabled, limit = pile.pile_size_limit, "draw pile saved");
    Ok(pile)
}

pub async fn draw_from_pile<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    group_id: GroupId,
    now: DateTime<Utc>,
) -> CoreResult<DrawOutcome> {
    let pile = repo
        .get_draw_pile(scope, group_id)
        .await?
        .ok_or(CoreError::NotFound("draw pile"))?;
    let cards = repo.list_group_cards(scope, group_id).await?;
    let entries = repo.list_context(scope, None).await?;

    let outcome = rotation::draw(&pile, &cards, &entries, now);
    let events: Vec<DrillEvent> = outcome
        .drawn
        .iter()
        .map(|e| DrillEvent::new(scope.clone(), e.card_id, DrillEventKind::Drawn, now))
        .collect();
    repo.save_drill_changes(&outcome.drawn, &events).await?;
    info!(
        %scope,
        %group_id,
        drawn = outcome.drawn.len(),
        already_active = outcome.already_active,
        expired_snoozes = outcome.expired_snoozes,
        "draw pile drawn"
    );
    Ok(outcome)
}

/// Draws from every enabled pile of the scope, one pile at a time.
pub async fn draw_all<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    now: DateTime<Utc>,
) -> CoreResult<Vec<DrillContextEntry>> {
    let mut drawn = Vec::new();
    for pile in repo.list_draw_piles(scope).await? {
        if !pile.enabled {
            continue;
        }
        drawn.extend(draw_from_pile(repo, scope, pile.group_id, now).await?.drawn);
    }
    Ok(drawn)
}

async fn transition<R, F>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    kind: DrillEventKind,
    now: DateTime<Utc>,
    apply: F,
) -> CoreResult<DrillContextEntry>
where
    R: Repository + ?Sized,
    F: FnOnce(&mut DrillContextEntry) -> CoreResult<()> + Send,
{
    let mut entry = repo
        .get_context_entry(scope, card_id)
        .await?
        .ok_or(CoreError::NotFound("drill entry"))?;
    if let Err(e) = apply(&mut entry) {
        warn!(%scope, %card_id, action = kind.as_str(), error = %e, "rejected drill transition");
        return Err(e);
    }
    let event = DrillEvent::new(scope.clone(), card_id, kind, now);
    repo.save_drill_changes(std::slice::from_ref(&entry), std::slice::from_ref(&event))
        .await?;
    info!(%scope, %card_id, state = %entry.state, "drill entry {}", kind.as_str());
    Ok(entry)
}

pub async fn snooze_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    transition(repo, scope, card_id, DrillEventKind::Snoozed, now, |e| {
        e.snooze(until, now)
    })
    .await
}

pub async fn wake_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    transition(repo, scope, card_id, DrillEventKind::Woken, now, |e| e.wake()).await
}

pub async fn dismiss_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    transition(repo, scope, card_id, DrillEventKind::Dismissed, now, |e| e.dismiss()).await
}

pub async fn record_drill_use<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    transition(repo, scope, card_id, DrillEventKind::Used, now, |e| e.record_use(now)).await
}

/// Explicitly puts a card into active context under `provenance`.
///
/// This is the only path back from `dismissed`. Adding a card that is
/// already active is a conflict.
pub async fn readd_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    provenance: Provenance,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    let card = repo.get_card(scope, card_id).await?;
    if !card.is_active() {
        return Err(CoreError::Invalid("only active cards can join drill context"));
    }
    if let Provenance::DrawPile(group_id) = &provenance {
        repo.get_group(scope, *group_id).await?;
    }

    let (entry, kind) = match repo.get_context_entry(scope, card_id).await? {
        None => (
            DrillContextEntry::new(scope.clone(), card_id, provenance, now),
            DrillEventKind::Pinned,
        ),
        Some(e) if e.state == DrillState::Active => {
            return Err(CoreError::Conflict("card is already in drill context"));
        }
        Some(mut e) => {
            e.readd(provenance, now)?;
            (e, DrillEventKind::Readded)
        }
    };
    let event = DrillEvent::new(scope.clone(), card_id, kind, now);
    repo.save_drill_changes(std::slice::from_ref(&entry), std::slice::from_ref(&event))
        .await?;
    info!(%scope, %card_id, added_from = %entry.added_from, "drill entry {}", kind.as_str());
    Ok(entry)
}

/// Manually pins a card into active context.
pub async fn pin_card<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    now: DateTime<Utc>,
) -> CoreResult<DrillContextEntry> {
    readd_card(repo, scope, card_id, Provenance::Manual, now).await
}

pub async fn set_cefr_override<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    card_id: CardId,
    level: Option<CefrLevel>,
) -> CoreResult<DrillContextEntry> {
    let mut entry = repo
        .get_context_entry(scope, card_id)
        .await?
        .ok_or(CoreError::NotFound("drill entry"))?;
    entry.cefr_override = level;
    repo.save_context_entry(&entry).await?;
    Ok(entry)
}
