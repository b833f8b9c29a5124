use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lingodrill_core::repo::tables::{Tables, TablesImage};
use lingodrill_core::{
    repo::Repository, ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError, DrawPile,
    DrillContextEntry, DrillEvent, DrillState, DueCard, Group, GroupId, Review, ReviewState, Scope,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tokio::task;

pub mod paths;

const FILE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    tables: TablesImage,
}

struct State {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tables: Tables,
}

impl State {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            tables: Tables::default(),
        }
    }

    fn to_image(&self) -> FileImage {
        FileImage {
            version: FILE_VERSION,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tables: self.tables.to_image(),
        }
    }

    fn from_image(img: FileImage) -> Self {
        Self {
            created_at: img.created_at,
            updated_at: img.updated_at,
            tables: Tables::from_image(img.tables),
        }
    }
}

/// Whole-store JSON file. Every mutation rewrites the file atomically and
/// drops a timestamped copy into the backups directory.
///
/// Mutations are serialized by `writer`, held from the table change until
/// the file is on disk, so snapshots reach the file in mutation order.
pub struct JsonStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl JsonStore {
    pub async fn open_default() -> Result<Self, CoreError> {
        let (file, backups) = paths::default_store_file();
        Self::open_with(file, backups, 10).await
    }

    pub async fn open_with(path: PathBuf, backups_dir: PathBuf, max_backups: usize) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        ensure_dir(&backups_dir)?;
        let state = load_or_init(&path, &backups_dir).await?;
        tracing::debug!(path = %path.display(), "json store opened");
        Ok(Self {
            path,
            backups_dir,
            max_backups: max_backups.max(1),
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    async fn write_snapshot(&self, snapshot: FileImage) -> Result<(), CoreError> {
        let path = self.path.clone();
        let backups = self.backups_dir.clone();
        let keep = self.max_backups;

        task::spawn_blocking(move || write_with_backup(&path, &backups, keep, &snapshot))
            .await
            .map_err(lingodrill_core::storage_err("json save join"))?
            .map_err(lingodrill_core::storage_err("json save"))?;
        Ok(())
    }

    /// Applies `f` to the tables and persists the result if it succeeded.
    /// A failed write restores the tables to their state before `f`.
    async fn mutate<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Tables) -> Result<T, CoreError> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let (out, before, snapshot) = {
            let mut s = self.state.write();
            let before = (s.tables.clone(), s.updated_at);
            let out = f(&mut s.tables)?;
            s.updated_at = Utc::now();
            (out, before, s.to_image())
        };
        if let Err(e) = self.write_snapshot(snapshot).await {
            let (tables, updated_at) = before;
            let mut s = self.state.write();
            s.tables = tables;
            s.updated_at = updated_at;
            return Err(e);
        }
        Ok(out)
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(path).map_err(lingodrill_core::storage_err("json mkdir"))
}

async fn load_or_init(path: &Path, backups_dir: &Path) -> Result<State, CoreError> {
    if path.exists() {
        let p = path.to_path_buf();
        let img: FileImage = task::spawn_blocking(move || {
            let buf = fs::read_to_string(&p)?;
            let v = serde_json::from_str::<FileImage>(&buf)?;
            Ok::<FileImage, std::io::Error>(v)
        })
        .await
        .map_err(lingodrill_core::storage_err("json load join"))?
        .map_err(lingodrill_core::storage_err("json load"))?;
        if img.version > FILE_VERSION {
            return Err(CoreError::Storage("json file version is newer than this build"));
        }
        Ok(State::from_image(img))
    } else {
        let st = State::new_empty();
        let img = st.to_image();
        write_with_backup(path, backups_dir, 1, &img).map_err(lingodrill_core::storage_err("json init"))?;
        Ok(st)
    }
}

fn write_with_backup(path: &Path, backups_dir: &Path, max_backups: usize, img: &FileImage) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(backups_dir)?;

    let json = serde_json::to_vec_pretty(img)?;
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path)?;

    // Backup rotation
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup_path = backups_dir.join(format!("lingodrill-{ts}.json"));
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(&json)?;
    btmp.flush()?;
    btmp.persist(&backup_path)?;

    rotate_backups(backups_dir, max_backups)?;

    Ok(())
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), std::io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

#[async_trait]
impl Repository for JsonStore {
    // ===== Cards =====
    async fn add_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.mutate(|t| t.add_card(card)).await
    }

    async fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError> {
        self.state.read().tables.get_card(scope, id)
    }

    async fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Result<Vec<Card>, CoreError> {
        Ok(self.state.read().tables.list_cards(scope, status))
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.mutate(|t| t.update_card(card)).await
    }

    async fn delete_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        self.mutate(|t| t.delete_card(scope, id)).await
    }

    // ===== Groups =====
    async fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, CoreError> {
        self.mutate(|t| t.create_group(scope, name, description)).await
    }

    async fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError> {
        self.state.read().tables.get_group(scope, id)
    }

    async fn list_groups(&self, scope: &Scope) -> Result<Vec<Group>, CoreError> {
        Ok(self.state.read().tables.list_groups(scope))
    }

    async fn update_group(&self, group: &Group) -> Result<Group, CoreError> {
        self.mutate(|t| t.update_group(group)).await
    }

    async fn delete_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        self.mutate(|t| t.delete_group(scope, id)).await
    }

    async fn assign_card(
        &self,
        scope: &Scope,
        card_id: CardId,
        group_id: GroupId,
    ) -> Result<CardGroup, CoreError> {
        self.mutate(|t| t.assign_card(scope, card_id, group_id)).await
    }

    async fn unassign_card(&self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError> {
        self.mutate(|t| t.unassign_card(scope, card_id, group_id)).await
    }

    async fn list_group_cards(&self, scope: &Scope, group_id: GroupId) -> Result<Vec<Card>, CoreError> {
        self.state.read().tables.list_group_cards(scope, group_id)
    }

    async fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError> {
        self.state.read().tables.list_card_groups(scope, card_id)
    }

    // ===== Review scheduling =====
    async fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Result<Option<ReviewState>, CoreError> {
        Ok(self.state.read().tables.get_review_state(scope, card_id))
    }

    async fn save_review_state(&self, state: &ReviewState) -> Result<(), CoreError> {
        self.mutate(|t| t.save_review_state(state)).await
    }

    async fn list_due(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Vec<DueCard>, CoreError> {
        Ok(self.state.read().tables.list_due(scope, now))
    }

    async fn insert_review(&self, review: &Review) -> Result<(), CoreError> {
        self.mutate(|t| t.insert_review(review)).await
    }

    async fn record_grading(&self, state: &ReviewState, review: &Review) -> Result<(), CoreError> {
        self.mutate(|t| t.record_grading(state, review)).await
    }

    async fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Result<Vec<Review>, CoreError> {
        Ok(self.state.read().tables.list_reviews(scope, card_id))
    }

    // ===== Drill context =====
    async fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Result<Option<DrawPile>, CoreError> {
        Ok(self.state.read().tables.get_draw_pile(scope, group_id))
    }

    async fn save_draw_pile(&self, pile: &DrawPile) -> Result<(), CoreError> {
        self.mutate(|t| t.save_draw_pile(pile)).await
    }

    async fn list_draw_piles(&self, scope: &Scope) -> Result<Vec<DrawPile>, CoreError> {
        Ok(self.state.read().tables.list_draw_piles(scope))
    }

    async fn get_context_entry(
        &self,
        scope: &Scope,
        card_id: CardId,
    ) -> Result<Option<DrillContextEntry>, CoreError> {
        Ok(self.state.read().tables.get_context_entry(scope, card_id))
    }

    async fn save_context_entry(&self, entry: &DrillContextEntry) -> Result<(), CoreError> {
        self.mutate(|t| t.save_context_entry(entry)).await
    }

    async fn list_context(
        &self,
        scope: &Scope,
        state: Option<DrillState>,
    ) -> Result<Vec<DrillContextEntry>, CoreError> {
        Ok(self.state.read().tables.list_context(scope, state))
    }

    async fn list_active_context(&self, scope: &Scope) -> Result<Vec<ActiveDrillCard>, CoreError> {
        Ok(self.state.read().tables.list_active_context(scope))
    }

    async fn insert_drill_event(&self, event: &DrillEvent) -> Result<(), CoreError> {
        self.mutate(|t| t.insert_drill_event(event)).await
    }

    async fn save_drill_changes(
        &self,
        entries: &[DrillContextEntry],
        events: &[DrillEvent],
    ) -> Result<(), CoreError> {
        self.mutate(|t| t.save_drill_changes(entries, events)).await
    }

    async fn list_drill_events(&self, scope: &Scope) -> Result<Vec<DrillEvent>, CoreError> {
        Ok(self.state.read().tables.list_drill_events(scope))
    }
}
