//! Moving cards in and out of a store: a JSON bundle that keeps ids and
//! memberships, and a flat CSV with one group name per row.

use anyhow::{bail, Result};
use lingodrill_core::{Card, CoreError, Group, GroupId, Repository, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const BUNDLE_VERSION: u32 = 1;

pub const CSV_HEADER: [&str; 7] = ["content", "meaning", "card_type", "status", "examples", "mnemonics", "group"];

#[derive(Serialize, Deserialize)]
struct Membership {
    card_id: Uuid,
    group_id: GroupId,
}

#[derive(Serialize, Deserialize)]
struct ExportBundle {
    version: u32,
    groups: Vec<Group>,
    cards: Vec<Card>,
    memberships: Vec<Membership>,
}

/// Writes every card, group and membership of `scope`. Returns the card count.
pub async fn export_json<R: Repository + ?Sized>(repo: &R, scope: &Scope, path: &Path) -> Result<usize> {
    let groups = repo.list_groups(scope).await?;
    let cards = repo.list_cards(scope, None).await?;
    let mut memberships = Vec::new();
    for g in &groups {
        for c in repo.list_group_cards(scope, g.id).await? {
            memberships.push(Membership { card_id: c.id, group_id: g.id });
        }
    }
    let written = cards.len();
    let bundle = ExportBundle { version: BUNDLE_VERSION, groups, cards, memberships };
    std::fs::write(path, serde_json::to_string_pretty(&bundle)?)?;
    Ok(written)
}

/// Loads a bundle into `scope`, whatever scope it was exported from.
///
/// Card ids are kept and cards already present are skipped. Groups are
/// matched by name, so bundle group ids are remapped onto existing groups.
/// Returns the number of cards added.
pub async fn import_json<R: Repository + ?Sized>(repo: &R, scope: &Scope, path: &Path) -> Result<usize> {
    let data = std::fs::read_to_string(path)?;
    let bundle: ExportBundle = serde_json::from_str(&data)?;
    if bundle.version > BUNDLE_VERSION {
        bail!("bundle version {} is newer than this build", bundle.version);
    }

    let mut group_ids = HashMap::new();
    for g in bundle.groups {
        let target = ensure_group_by_name(repo, scope, &g.name, g.description.as_deref()).await?;
        group_ids.insert(g.id, target.id);
    }
    let mut imported = 0usize;
    for mut c in bundle.cards {
        c.scope = scope.clone();
        match repo.add_card(&c).await {
            Ok(_) => imported += 1,
            Err(CoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    for m in bundle.memberships {
        if let Some(gid) = group_ids.get(&m.group_id) {
            match repo.assign_card(scope, m.card_id, *gid).await {
                Ok(_) | Err(CoreError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(imported)
}

/// Writes one row per card; with `group`, only that group's cards.
/// Cards in several groups are listed under the first by name.
pub async fn export_csv<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    path: &Path,
    group: Option<&Group>,
) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(CSV_HEADER)?;
    let mut written = 0usize;
    match group {
        Some(g) => {
            for c in repo.list_group_cards(scope, g.id).await? {
                wtr.write_record(card_record(&c, &g.name))?;
                written += 1;
            }
        }
        None => {
            let mut group_of: HashMap<Uuid, String> = HashMap::new();
            for g in repo.list_groups(scope).await? {
                for c in repo.list_group_cards(scope, g.id).await? {
                    group_of.entry(c.id).or_insert_with(|| g.name.clone());
                }
            }
            for c in repo.list_cards(scope, None).await? {
                let name = group_of.get(&c.id).map(String::as_str).unwrap_or("");
                wtr.write_record(card_record(&c, name))?;
                written += 1;
            }
        }
    }
    wtr.flush()?;
    Ok(written)
}

/// Adds one card per non-empty row. `group` overrides the row's group column;
/// otherwise groups named in the file are created on first use.
pub async fn import_csv<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    path: &Path,
    group: Option<&Group>,
) -> Result<usize> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut imported = 0usize;
    for rec in rdr.records() {
        let rec = rec?;
        let field = |i: usize| rec.get(i).unwrap_or("").trim().to_string();
        let content = field(0);
        if content.is_empty() {
            continue;
        }
        let mut card = Card::new(scope.clone(), content);
        card.meaning = Some(field(1)).filter(|s| !s.is_empty());
        if !field(2).is_empty() {
            card.card_type = field(2).parse()?;
        }
        if !field(3).is_empty() {
            card.status = field(3).parse()?;
        }
        card.examples = split_list(&field(4));
        card.mnemonics = split_list(&field(5));
        let card = repo.add_card(&card).await?;

        let group_name = field(6);
        let target = match group {
            Some(g) => Some(g.clone()),
            None if !group_name.is_empty() => Some(ensure_group_by_name(repo, scope, &group_name, None).await?),
            None => None,
        };
        if let Some(g) = target {
            repo.assign_card(scope, card.id, g.id).await?;
        }
        imported += 1;
    }
    Ok(imported)
}

fn card_record(c: &Card, group: &str) -> [String; 7] {
    [
        c.content.clone(),
        c.meaning.clone().unwrap_or_default(),
        c.card_type.as_str().to_string(),
        c.status.as_str().to_string(),
        c.examples.join(";"),
        c.mnemonics.join(";"),
        group.to_string(),
    ]
}

/// Splits a `;`-separated cell, dropping blanks.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(';')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_string())
        .collect()
}

async fn ensure_group_by_name<R: Repository + ?Sized>(
    repo: &R,
    scope: &Scope,
    name: &str,
    description: Option<&str>,
) -> Result<Group> {
    let groups = repo.list_groups(scope).await?;
    if let Some(g) = groups.into_iter().find(|g| g.name_matches(name)) {
        return Ok(g);
    }
    Ok(repo.create_group(scope, name, description).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a ; ;b;"), vec!["a".to_string(), "b".to_string()]);
        assert!(split_list("").is_empty());
    }
}
