use crate::api::server as api_server;
use crate::cli::opts::*;
use crate::cli::transfer;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use lingodrill_core::{
    filters::filter_by_text, rotation, service, stats, Card, CardStatus, CardType, DrillState, Group,
    GroupId, Provenance, Quality, Repository, SchedulerConfig, Scope,
};
use lingodrill_json::paths::{data_root, default_store_file};
use lingodrill_json::JsonStore;
use lingodrill_pg::PostgresRepo;
use lingodrill_sqlite::SqliteRepo;
use std::collections::HashMap;
use std::io::{stdin, stdout, BufRead, Write};
use std::sync::Arc;
use uuid::Uuid;

pub async fn run_cli(args: Cli) -> Result<()> {
    let repo = open_repo(&args).await?;
    let scope = Scope::new(args.user.clone(), args.language.clone());
    let cfg = SchedulerConfig::default();
    tracing::debug!(%scope, store = ?args.store, "store ready");

    match args.cmd {
        Command::Api(api) => {
            let addr: std::net::SocketAddr = api.addr.parse()?;
            api_server::run(repo, cfg, addr).await
        }
        Command::Card(cmd) => card_cmd(&*repo, &scope, cmd).await,
        Command::Group(cmd) => group_cmd(&*repo, &scope, cmd).await,
        Command::Review(cmd) => review_cmd(&*repo, &cfg, &scope, cmd).await,
        Command::Drill(cmd) => drill_cmd(&*repo, &scope, cmd).await,
        Command::Pile(cmd) => pile_cmd(&*repo, &scope, cmd).await,
        Command::Stats(cmd) => stats_cmd(&*repo, &scope, cmd).await,
        Command::Export(cmd) => export_cmd(&*repo, &scope, cmd).await,
        Command::Import(cmd) => import_cmd(&*repo, &scope, cmd).await,
    }
}

pub async fn open_repo(args: &Cli) -> Result<Arc<dyn Repository>> {
    match args.store {
        StoreKind::Json => {
            let s = match &args.db_path {
                Some(p) => {
                    let backups = p
                        .parent()
                        .map(|d| d.join("backups"))
                        .unwrap_or_else(|| default_store_file().1);
                    JsonStore::open_with(p.clone(), backups, 10).await?
                }
                None => JsonStore::open_default().await?,
            };
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = args
                .db_path
                .clone()
                .unwrap_or_else(|| data_root().join("lingodrill.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let s = SqliteRepo::open_file(&p).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Pg => {
            let url = args
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("--store pg needs --database-url or DATABASE_URL"))?;
            let s = PostgresRepo::connect(url).await?;
            Ok(Arc::new(s))
        }
    }
}

async fn card_cmd(repo: &dyn Repository, scope: &Scope, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let mut card = Card::new(scope.clone(), a.content);
            card.meaning = a.meaning;
            card.card_type = a.card_type.parse::<CardType>()?;
            card.status = a.status.parse::<CardStatus>()?;
            card.examples = a.examples;
            card.mnemonics = a.mnemonics;
            card.llm_instructions = a.instructions;
            let card = repo.add_card(&card).await?;
            if let Some(sel) = a.group {
                let g = resolve_group(repo, scope, &sel).await?;
                repo.assign_card(scope, card.id, g.id).await?;
            }
            println!("{}", card.id);
        }
        CardCmd::List { status, group, search } => {
            let status = status.map(|s| s.parse::<CardStatus>()).transpose()?;
            let mut cards = match group {
                Some(sel) => {
                    let g = resolve_group(repo, scope, &sel).await?;
                    let mut v = repo.list_group_cards(scope, g.id).await?;
                    if let Some(st) = status {
                        v.retain(|c| c.status == st);
                    }
                    v
                }
                None => repo.list_cards(scope, status).await?,
            };
            if let Some(q) = search {
                cards = filter_by_text(&cards, &q);
            }
            for c in cards {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    c.id,
                    c.content,
                    c.meaning.as_deref().unwrap_or("-"),
                    c.card_type.as_str(),
                    c.status
                );
            }
        }
        CardCmd::Show { card_id } => {
            let id = parse_uuid(&card_id)?;
            let card = repo.get_card(scope, id).await?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            if let Some(st) = repo.get_review_state(scope, id).await? {
                println!(
                    "review: due {} interval={}d ease={:.2} reviews={}",
                    st.next_due_at().to_rfc3339(),
                    st.interval_days,
                    st.ease_factor,
                    st.review_count
                );
            }
            if let Some(e) = repo.get_context_entry(scope, id).await? {
                println!("drill: {} from {} uses={}", e.state, e.added_from, e.usage_count);
            }
        }
        CardCmd::Groups { card_id } => {
            let id = parse_uuid(&card_id)?;
            for g in repo.list_card_groups(scope, id).await? {
                println!("{}\t{}", g.id, g.name);
            }
        }
        CardCmd::Edit(e) => {
            let id = parse_uuid(&e.card_id)?;
            let mut card = repo.get_card(scope, id).await?;

            if let Some(c) = e.content {
                card.content = c;
            }
            if e.clear_meaning {
                card.meaning = None;
            }
            if let Some(m) = e.meaning {
                card.meaning = Some(m);
            }
            if let Some(t) = e.card_type {
                card.card_type = t.parse()?;
            }
            card.examples.extend(e.add_examples);
            card.mnemonics.extend(e.add_mnemonics);
            if let Some(i) = e.instructions {
                card.llm_instructions = Some(i);
            }
            card.updated_at = Utc::now();

            repo.update_card(&card).await?;
            println!("ok");
        }
        CardCmd::Status { card_id, status } => {
            let id = parse_uuid(&card_id)?;
            let to = status.parse::<CardStatus>()?;
            let card = service::set_card_status(repo, scope, id, to, Utc::now()).await?;
            println!("{}\t{}", card.id, card.status);
        }
        CardCmd::Rm { card_id } => {
            let id = parse_uuid(&card_id)?;
            repo.delete_card(scope, id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn group_cmd(repo: &dyn Repository, scope: &Scope, cmd: GroupCmd) -> Result<()> {
    match cmd {
        GroupCmd::Add { name, description } => {
            let g = repo.create_group(scope, &name, description.as_deref()).await?;
            println!("{}", g.id);
        }
        GroupCmd::List => {
            for g in repo.list_groups(scope).await? {
                println!("{}\t{}\t{}", g.id, g.name, g.description.as_deref().unwrap_or(""));
            }
        }
        GroupCmd::Edit { group, name, description, clear_description } => {
            let mut g = resolve_group(repo, scope, &group).await?;
            if let Some(n) = name {
                g.name = n;
            }
            if clear_description {
                g.description = None;
            }
            if description.is_some() {
                g.description = description;
            }
            let g = repo.update_group(&g).await?;
            println!("{}\t{}\t{}", g.id, g.name, g.description.as_deref().unwrap_or(""));
        }
        GroupCmd::Rm { group } => {
            let g = resolve_group(repo, scope, &group).await?;
            repo.delete_group(scope, g.id).await?;
            println!("ok");
        }
        GroupCmd::Cards { group } => {
            let g = resolve_group(repo, scope, &group).await?;
            for c in repo.list_group_cards(scope, g.id).await? {
                println!("{}\t{}\t{}", c.id, c.content, c.status);
            }
        }
        GroupCmd::Assign { group, card_id } => {
            let g = resolve_group(repo, scope, &group).await?;
            repo.assign_card(scope, parse_uuid(&card_id)?, g.id).await?;
            println!("ok");
        }
        GroupCmd::Unassign { group, card_id } => {
            let g = resolve_group(repo, scope, &group).await?;
            repo.unassign_card(scope, parse_uuid(&card_id)?, g.id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn review_cmd(repo: &dyn Repository, cfg: &SchedulerConfig, scope: &Scope, cmd: ReviewCmd) -> Result<()> {
    match cmd {
        ReviewCmd::Due { max } => {
            let due = repo.list_due(scope, Utc::now()).await?;
            if due.is_empty() {
                println!("no cards due");
            }
            for d in due.into_iter().take(max) {
                println!(
                    "{}\t{}\tdue={}\tinterval={}d",
                    d.card.id,
                    d.card.content,
                    d.review.next_due_at().to_rfc3339(),
                    d.review.interval_days
                );
            }
        }
        ReviewCmd::Grade { card_id, quality } => {
            let id = parse_uuid(&card_id)?;
            let q = quality.parse::<Quality>()?;
            let out = service::grade_card(repo, cfg, scope, id, q, Utc::now()).await?;
            println!("next due in {} day(s)", out.state.interval_days);
        }
        ReviewCmd::Run { max, include_new } => review_loop(repo, cfg, scope, max, include_new).await?,
    }
    Ok(())
}

async fn review_loop(
    repo: &dyn Repository,
    cfg: &SchedulerConfig,
    scope: &Scope,
    max: usize,
    include_new: bool,
) -> Result<()> {
    let now = Utc::now();
    if include_new {
        for card in repo.list_cards(scope, Some(CardStatus::Active)).await? {
            service::enroll_card(repo, scope, card.id, now).await?;
        }
    }

    let pool = repo.list_due(scope, now).await?;
    if pool.is_empty() {
        println!("no cards due");
        return Ok(());
    }

    let total = pool.len().min(max);
    let mut count = 0usize;
    for due in pool.into_iter().take(max) {
        count += 1;
        let card = due.card;
        println!("\n[{}/{}] {}", count, total, card.id);
        println!("Q: {}", card.content);
        if prompt("[enter=show]")?.is_none() {
            println!();
            return Ok(());
        }
        println!("A: {}", card.meaning.as_deref().unwrap_or("(no meaning)"));
        for ex in &card.examples {
            println!("  e.g. {ex}");
        }
        println!("[1=Hard, 2=Medium, 3=Easy, s=skip, q=quit]");
        let q = loop {
            let Some(line) = prompt("grade> ")? else {
                println!();
                return Ok(());
            };
            match parse_grade_reply(&line) {
                GradeReply::Grade(q) => break Some(q),
                GradeReply::Skip => break None,
                GradeReply::Quit => return Ok(()),
                GradeReply::Unknown => println!("enter 1/2/3, s, or q"),
            }
        };

        if let Some(q) = q {
            let out = service::grade_card(repo, cfg, scope, card.id, q, Utc::now()).await?;
            println!("→ next due in {} day(s)", out.state.interval_days);
        }
    }

    println!("\nreviewed {}", count);
    Ok(())
}

async fn drill_cmd(repo: &dyn Repository, scope: &Scope, cmd: DrillCmd) -> Result<()> {
    let now = Utc::now();
    match cmd {
        DrillCmd::Active => {
            for a in repo.list_active_context(scope).await? {
                println!(
                    "{}\t{}\tfrom={}\tuses={}",
                    a.card.id, a.card.content, a.entry.added_from, a.entry.usage_count
                );
            }
        }
        DrillCmd::List { state } => {
            let state = state.map(|s| s.parse::<DrillState>()).transpose()?;
            for e in repo.list_context(scope, state).await? {
                let until = e.state_until.map(|t| t.to_rfc3339()).unwrap_or_default();
                println!("{}\t{}\t{}\t{}", e.card_id, e.state, e.added_from, until);
            }
        }
        DrillCmd::Draw { group } => {
            let drawn = match group {
                Some(sel) => {
                    let g = resolve_group(repo, scope, &sel).await?;
                    service::draw_from_pile(repo, scope, g.id, now).await?.drawn
                }
                None => service::draw_all(repo, scope, now).await?,
            };
            for e in &drawn {
                println!("{}\t{}", e.card_id, e.added_from);
            }
            println!("drew {}", drawn.len());
        }
        DrillCmd::Snooze { card_id, hours, until } => {
            let until = match until {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| anyhow!("invalid --until timestamp: {s}"))?
                    .with_timezone(&Utc),
                None => rotation::snooze_deadline(now, hours)?,
            };
            let e = service::snooze_card(repo, scope, parse_uuid(&card_id)?, until, now).await?;
            println!("snoozed until {}", e.state_until.map(|t| t.to_rfc3339()).unwrap_or_default());
        }
        DrillCmd::Wake { card_id } => {
            service::wake_card(repo, scope, parse_uuid(&card_id)?, now).await?;
            println!("ok");
        }
        DrillCmd::Dismiss { card_id } => {
            service::dismiss_card(repo, scope, parse_uuid(&card_id)?, now).await?;
            println!("ok");
        }
        DrillCmd::Pin { card_id } => {
            service::pin_card(repo, scope, parse_uuid(&card_id)?, now).await?;
            println!("ok");
        }
        DrillCmd::Readd { card_id, group } => {
            let provenance = match group {
                Some(sel) => Provenance::DrawPile(resolve_group(repo, scope, &sel).await?.id),
                None => Provenance::Manual,
            };
            let e = service::readd_card(repo, scope, parse_uuid(&card_id)?, provenance, now).await?;
            println!("{}\t{}", e.card_id, e.added_from);
        }
        DrillCmd::Use { card_id } => {
            let e = service::record_drill_use(repo, scope, parse_uuid(&card_id)?, now).await?;
            println!("uses={}", e.usage_count);
        }
        DrillCmd::Cefr { card_id, level } => {
            let level = level.map(|l| l.parse()).transpose()?;
            let e = service::set_cefr_override(repo, scope, parse_uuid(&card_id)?, level).await?;
            println!("cefr={}", e.cefr_override.map(|c| c.as_str()).unwrap_or("-"));
        }
    }
    Ok(())
}

async fn pile_cmd(repo: &dyn Repository, scope: &Scope, cmd: PileCmd) -> Result<()> {
    match cmd {
        PileCmd::Set { group, enable, disable, limit, name } => {
            let g = resolve_group(repo, scope, &group).await?;
            let enabled = if enable {
                Some(true)
            } else if disable {
                Some(false)
            } else {
                None
            };
            let p = service::configure_pile(repo, scope, g.id, enabled, limit, name).await?;
            println!("{}\tenabled={}\tlimit={}", g.name, p.enabled, p.pile_size_limit);
        }
        PileCmd::List => {
            let names: HashMap<GroupId, String> = repo
                .list_groups(scope)
                .await?
                .into_iter()
                .map(|g| (g.id, g.name))
                .collect();
            for p in repo.list_draw_piles(scope).await? {
                let group = names.get(&p.group_id).cloned().unwrap_or_else(|| p.group_id.to_string());
                println!(
                    "{}\t{}\tenabled={}\tlimit={}",
                    group,
                    p.name.as_deref().unwrap_or("-"),
                    p.enabled,
                    p.pile_size_limit
                );
            }
        }
    }
    Ok(())
}

async fn stats_cmd(repo: &dyn Repository, scope: &Scope, cmd: StatsCmd) -> Result<()> {
    let reviews = repo.list_reviews(scope, None).await?;
    let events = repo.list_drill_events(scope).await?;
    let summary = stats::summarize(&reviews, &events);
    let streak = stats::daily_streak(&reviews, Utc::now().date_naive());

    if cmd.json {
        let v = serde_json::json!({ "summary": summary, "streak_days": streak });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    let r = &summary.reviews;
    println!(
        "reviews: {} (hard {}, medium {}, easy {}) accuracy {:.0}%",
        r.total,
        r.hard,
        r.medium,
        r.easy,
        r.accuracy() * 100.0
    );
    let d = &summary.drill;
    println!(
        "drill: drawn {}, pinned {}, snoozed {}, dismissed {}, used {}",
        d.drawn, d.pinned, d.snoozed, d.dismissed, d.used
    );
    println!("streak: {streak} day(s)");
    for (day, s) in summary.per_day.iter().rev().take(cmd.days) {
        println!(
            "{day}\treviewed={}\teasy={}\tmedium={}\thard={}\tdrawn={}\tused={}",
            s.reviews.total, s.reviews.easy, s.reviews.medium, s.reviews.hard, s.drill.drawn, s.drill.used
        );
    }
    Ok(())
}

async fn export_cmd(repo: &dyn Repository, scope: &Scope, cmd: ExportCmd) -> Result<()> {
    let (path, n) = match cmd {
        ExportCmd::Json { path } => {
            let n = transfer::export_json(repo, scope, &path).await?;
            (path, n)
        }
        ExportCmd::Csv { path, group } => {
            let g = match group {
                Some(sel) => Some(resolve_group(repo, scope, &sel).await?),
                None => None,
            };
            let n = transfer::export_csv(repo, scope, &path, g.as_ref()).await?;
            (path, n)
        }
    };
    println!("wrote {n} card(s) to {}", path.display());
    Ok(())
}

async fn import_cmd(repo: &dyn Repository, scope: &Scope, cmd: ImportCmd) -> Result<()> {
    let imported = match cmd {
        ImportCmd::Json { path } => transfer::import_json(repo, scope, &path).await?,
        ImportCmd::Csv { path, group } => {
            let g = match group {
                Some(sel) => Some(resolve_group(repo, scope, &sel).await?),
                None => None,
            };
            transfer::import_csv(repo, scope, &path, g.as_ref()).await?
        }
    };
    println!("imported {imported}");
    Ok(())
}

// ===== Helpers =====
fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| anyhow!("invalid uuid"))
}

pub async fn resolve_group<R: Repository + ?Sized>(repo: &R, scope: &Scope, sel: &str) -> Result<Group> {
    if let Ok(id) = Uuid::parse_str(sel) {
        if let Ok(g) = repo.get_group(scope, id).await {
            return Ok(g);
        }
    }
    let groups = repo.list_groups(scope).await?;
    if let Some(g) = groups.into_iter().find(|g| g.name_matches(sel)) {
        return Ok(g);
    }
    bail!("group not found: {}", sel)
}

/// `None` once stdin is closed.
fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    stdout().flush().ok();
    Ok(read_input(&mut stdin().lock())?)
}

fn read_input(input: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut s = String::new();
    if input.read_line(&mut s)? == 0 {
        return Ok(None);
    }
    Ok(Some(s))
}

/// A reply in the grading prompt.
#[derive(Debug, PartialEq)]
enum GradeReply {
    Grade(Quality),
    Skip,
    Quit,
    Unknown,
}

fn parse_grade_reply(line: &str) -> GradeReply {
    match line.trim().to_lowercase().as_str() {
        "s" | "skip" => GradeReply::Skip,
        "q" | "quit" => GradeReply::Quit,
        other => other.parse::<Quality>().map(GradeReply::Grade).unwrap_or(GradeReply::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn closed_input_reads_as_none() {
        let mut input = Cursor::new("3\n");
        assert_eq!(read_input(&mut input).unwrap().as_deref(), Some("3\n"));
        assert_eq!(read_input(&mut input).unwrap(), None);
        assert_eq!(read_input(&mut Cursor::new("")).unwrap(), None);
    }

    #[test]
    fn blank_line_is_not_end_of_input() {
        let mut input = Cursor::new("\n");
        assert_eq!(read_input(&mut input).unwrap().as_deref(), Some("\n"));
        assert_eq!(parse_grade_reply("\n"), GradeReply::Unknown);
    }

    #[test]
    fn grade_replies() {
        assert_eq!(parse_grade_reply(" 3 \n"), GradeReply::Grade(Quality::Easy));
        assert_eq!(parse_grade_reply("Hard"), GradeReply::Grade(Quality::Hard));
        assert_eq!(parse_grade_reply("S"), GradeReply::Skip);
        assert_eq!(parse_grade_reply("quit"), GradeReply::Quit);
        assert_eq!(parse_grade_reply("7"), GradeReply::Unknown);
    }
}
