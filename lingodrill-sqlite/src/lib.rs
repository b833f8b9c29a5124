use chrono::{DateTime, SecondsFormat, Utc};
use lingodrill_core::{
    repo::Repository, storage_err, ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError,
    DrawPile, DrillContextEntry, DrillEvent, DrillState, DueCard, Group, GroupId, Quality, Review,
    ReviewState, Scope,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cards (
  user_id           TEXT NOT NULL,
  language_id       TEXT NOT NULL,
  card_id           TEXT NOT NULL,
  content           TEXT NOT NULL,
  meaning           TEXT,
  card_type         TEXT NOT NULL DEFAULT 'word',
  status            TEXT NOT NULL DEFAULT 'active',
  examples          TEXT NOT NULL DEFAULT '[]',
  mnemonics         TEXT NOT NULL DEFAULT '[]',
  llm_instructions  TEXT,
  created_at        TEXT NOT NULL,
  updated_at        TEXT NOT NULL,
  PRIMARY KEY (user_id, language_id, card_id)
);

CREATE INDEX IF NOT EXISTS idx_cards_status ON cards (user_id, language_id, status, updated_at);

CREATE TABLE IF NOT EXISTS study_groups (
  user_id      TEXT NOT NULL,
  language_id  TEXT NOT NULL,
  group_id     TEXT NOT NULL,
  group_name   TEXT NOT NULL,
  description  TEXT,
  created_at   TEXT NOT NULL,
  PRIMARY KEY (user_id, language_id, group_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_name ON study_groups (user_id, language_id, lower(group_name));

CREATE TABLE IF NOT EXISTS card_groups (
  user_id      TEXT NOT NULL,
  language_id  TEXT NOT NULL,
  card_id      TEXT NOT NULL,
  group_id     TEXT NOT NULL,
  assigned_at  TEXT NOT NULL,
  PRIMARY KEY (user_id, language_id, card_id, group_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE,
  FOREIGN KEY (user_id, language_id, group_id) REFERENCES study_groups (user_id, language_id, group_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_card_groups_by_group ON card_groups (user_id, language_id, group_id);

CREATE TABLE IF NOT EXISTS card_review_srs (
  user_id        TEXT NOT NULL,
  language_id    TEXT NOT NULL,
  card_id        TEXT NOT NULL,
  next_due       INTEGER NOT NULL DEFAULT 0,
  interval_days  INTEGER NOT NULL DEFAULT 1,
  ease_factor    REAL    NOT NULL DEFAULT 2.5,
  review_count   INTEGER NOT NULL DEFAULT 0,
  last_reviewed  INTEGER,
  PRIMARY KEY (user_id, language_id, card_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_card_review_srs_due ON card_review_srs (user_id, language_id, next_due);

CREATE TABLE IF NOT EXISTS card_reviews (
  review_id         TEXT PRIMARY KEY,
  user_id           TEXT NOT NULL,
  language_id       TEXT NOT NULL,
  card_id           TEXT NOT NULL,
  quality           INTEGER NOT NULL,
  reviewed_at       TEXT NOT NULL,
  interval_applied  INTEGER NOT NULL,
  ease_after        REAL NOT NULL,
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_card_reviews_time ON card_reviews (user_id, language_id, reviewed_at);

CREATE TABLE IF NOT EXISTS translation_drill_draw_piles (
  user_id          TEXT NOT NULL,
  language_id      TEXT NOT NULL,
  group_id         TEXT NOT NULL,
  enabled          INTEGER NOT NULL DEFAULT 1,
  draw_pile_name   TEXT,
  pile_size_limit  INTEGER NOT NULL DEFAULT 10,
  created_at       TEXT NOT NULL,
  PRIMARY KEY (user_id, language_id, group_id),
  FOREIGN KEY (user_id, language_id, group_id) REFERENCES study_groups (user_id, language_id, group_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS translation_drill_context (
  user_id        TEXT NOT NULL,
  language_id    TEXT NOT NULL,
  card_id        TEXT NOT NULL,
  state          TEXT NOT NULL DEFAULT 'active',
  added_from     TEXT NOT NULL,
  added_at       TEXT NOT NULL,
  last_used      TEXT,
  usage_count    INTEGER NOT NULL DEFAULT 0,
  state_until    TEXT,
  cefr_override  TEXT,
  PRIMARY KEY (user_id, language_id, card_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_translation_context_state ON translation_drill_context (user_id, language_id, state);

CREATE TABLE IF NOT EXISTS translation_drill_events (
  event_id     TEXT PRIMARY KEY,
  user_id      TEXT NOT NULL,
  language_id  TEXT NOT NULL,
  card_id      TEXT NOT NULL,
  kind         TEXT NOT NULL,
  at           TEXT NOT NULL,
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_translation_drill_events_time ON translation_drill_events (user_id, language_id, at)
"#;

const CARD_COLS: &str = "c.user_id, c.language_id, c.card_id, c.content, c.meaning, c.card_type, c.status, \
     c.examples, c.mnemonics, c.llm_instructions, c.created_at, c.updated_at";

const CONTEXT_COLS: &str = "t.user_id, t.language_id, t.card_id, t.state, t.added_from, t.added_at, \
     t.last_used, t.usage_count, t.state_until, t.cefr_override";

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(storage_err("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        tracing::debug!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(repo)
    }

    /// A private in-memory database; the single connection is pinned so the data lives as long as the repo.
    pub async fn open_memory() -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage_err("sqlite options"))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(storage_err("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        // Execute statements one by one for compatibility.
        for chunk in SCHEMA.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err("sqlite schema"))?;
        }
        Ok(())
    }

    async fn card_exists(&self, scope: &Scope, id: CardId) -> Result<bool, CoreError> {
        let mut conn = self.conn().await?;
        card_exists_on(&mut conn, scope, id).await
    }

    async fn require_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        require_card_on(&mut conn, scope, id).await
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>, CoreError> {
        self.pool.acquire().await.map_err(storage_err("sqlite acquire"))
    }

    /// Unicode-aware name clash check; the `lower()` index only folds ASCII.
    async fn group_name_taken(&self, scope: &Scope, name: &str, except: Option<GroupId>) -> Result<bool, CoreError> {
        Ok(self
            .list_groups(scope)
            .await?
            .iter()
            .any(|g| Some(g.id) != except && g.name_matches(name)))
    }

    async fn require_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        let found = sqlx::query(
            "SELECT 1 FROM study_groups WHERE user_id=? AND language_id=? AND group_id=? LIMIT 1",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read group"))?
        .is_some();
        if found {
            Ok(())
        } else {
            Err(CoreError::NotFound("group"))
        }
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepo {
    // ===== Cards =====
    async fn add_card(&self, card: &Card) -> Result<Card, CoreError> {
        if self.card_exists(&card.scope, card.id).await? {
            return Err(CoreError::Conflict("card id already exists"));
        }
        sqlx::query(
            r#"
            INSERT INTO cards (
              user_id, language_id, card_id, content, meaning, card_type, status,
              examples, mnemonics, llm_instructions, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&card.scope.user_id)
        .bind(&card.scope.language_id)
        .bind(card.id.to_string())
        .bind(&card.content)
        .bind(card.meaning.clone())
        .bind(card.card_type.as_str())
        .bind(card.status.as_str())
        .bind(list_to_json(&card.examples))
        .bind(list_to_json(&card.mnemonics))
        .bind(card.llm_instructions.clone())
        .bind(dt_to_str(card.created_at))
        .bind(dt_to_str(card.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite insert card"))?;
        Ok(card.clone())
    }

    async fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards c WHERE c.user_id=? AND c.language_id=? AND c.card_id=?"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(&row)
    }

    async fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Result<Vec<Card>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards c \
             WHERE c.user_id=? AND c.language_id=? AND (? IS NULL OR c.status=?) \
             ORDER BY c.created_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list cards"))?;
        rows.iter().map(row_into_card).collect()
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              content=?, meaning=?, card_type=?, status=?, examples=?, mnemonics=?,
              llm_instructions=?, updated_at=?
            WHERE user_id=? AND language_id=? AND card_id=?
            "#,
        )
        .bind(&card.content)
        .bind(card.meaning.clone())
        .bind(card.card_type.as_str())
        .bind(card.status.as_str())
        .bind(list_to_json(&card.examples))
        .bind(list_to_json(&card.mnemonics))
        .bind(card.llm_instructions.clone())
        .bind(dt_to_str(card.updated_at))
        .bind(&card.scope.user_id)
        .bind(&card.scope.language_id)
        .bind(card.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM cards WHERE user_id=? AND language_id=? AND card_id=?")
            .bind(&scope.user_id)
            .bind(&scope.language_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err("sqlite del card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    // ===== Groups =====
    async fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, CoreError> {
        if self.group_name_taken(scope, name, None).await? {
            return Err(CoreError::Conflict("group name already exists"));
        }

        let mut group = Group::new(scope.clone(), name);
        group.description = description.map(|s| s.to_string());
        sqlx::query(
            "INSERT INTO study_groups (user_id,language_id,group_id,group_name,description,created_at) VALUES (?,?,?,?,?,?)",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group.id.to_string())
        .bind(&group.name)
        .bind(group.description.clone())
        .bind(dt_to_str(group.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite insert group"))?;
        Ok(group)
    }

    async fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,group_id,group_name,description,created_at FROM study_groups \
             WHERE user_id=? AND language_id=? AND group_id=?",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read group"))?;
        let row = row.ok_or(CoreError::NotFound("group"))?;
        row_into_group(&row)
    }

    async fn list_groups(&self, scope: &Scope) -> Result<Vec<Group>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id,language_id,group_id,group_name,description,created_at FROM study_groups \
             WHERE user_id=? AND language_id=? ORDER BY lower(group_name) ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list groups"))?;
        rows.iter().map(row_into_group).collect()
    }

    async fn update_group(&self, group: &Group) -> Result<Group, CoreError> {
        self.require_group(&group.scope, group.id).await?;
        if self.group_name_taken(&group.scope, &group.name, Some(group.id)).await? {
            return Err(CoreError::Conflict("group name already exists"));
        }
        sqlx::query(
            "UPDATE study_groups SET group_name=?, description=? WHERE user_id=? AND language_id=? AND group_id=?",
        )
        .bind(&group.name)
        .bind(group.description.clone())
        .bind(&group.scope.user_id)
        .bind(&group.scope.language_id)
        .bind(group.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite update group"))?;
        self.get_group(&group.scope, group.id).await
    }

    async fn delete_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM study_groups WHERE user_id=? AND language_id=? AND group_id=?")
            .bind(&scope.user_id)
            .bind(&scope.language_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err("sqlite del group"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("group"));
        }
        Ok(())
    }

    async fn assign_card(
        &self,
        scope: &Scope,
        card_id: CardId,
        group_id: GroupId,
    ) -> Result<CardGroup, CoreError> {
        self.require_card(scope, card_id).await?;
        self.require_group(scope, group_id).await?;
        let m = CardGroup {
            scope: scope.clone(),
            card_id,
            group_id,
            assigned_at: Utc::now(),
        };
        let res = sqlx::query(
            "INSERT INTO card_groups (user_id,language_id,card_id,group_id,assigned_at) VALUES (?,?,?,?,?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id.to_string())
        .bind(group_id.to_string())
        .bind(dt_to_str(m.assigned_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite assign card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::Conflict("card already in group"));
        }
        Ok(m)
    }

    async fn unassign_card(&self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError> {
        let res = sqlx::query(
            "DELETE FROM card_groups WHERE user_id=? AND language_id=? AND card_id=? AND group_id=?",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id.to_string())
        .bind(group_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite unassign card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("membership"));
        }
        Ok(())
    }

    async fn list_group_cards(&self, scope: &Scope, group_id: GroupId) -> Result<Vec<Card>, CoreError> {
        self.require_group(scope, group_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards c JOIN card_groups g \
               ON c.user_id=g.user_id AND c.language_id=g.language_id AND c.card_id=g.card_id \
             WHERE g.user_id=? AND g.language_id=? AND g.group_id=? \
             ORDER BY g.assigned_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list group cards"))?;
        rows.iter().map(row_into_card).collect()
    }

    async fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError> {
        self.require_card(scope, card_id).await?;
        let rows = sqlx::query(
            "SELECT g.user_id,g.language_id,g.group_id,g.group_name,g.description,g.created_at \
             FROM study_groups g JOIN card_groups m \
               ON g.user_id=m.user_id AND g.language_id=m.language_id AND g.group_id=m.group_id \
             WHERE m.user_id=? AND m.language_id=? AND m.card_id=? \
             ORDER BY lower(g.group_name) ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list card groups"))?;
        rows.iter().map(row_into_group).collect()
    }

    // ===== Review scheduling =====
    async fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Result<Option<ReviewState>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,card_id,next_due,interval_days,ease_factor,review_count,last_reviewed \
             FROM card_review_srs WHERE user_id=? AND language_id=? AND card_id=?",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read review state"))?;
        row.as_ref().map(row_into_state).transpose()
    }

    async fn save_review_state(&self, state: &ReviewState) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        require_card_on(&mut conn, &state.scope, state.card_id).await?;
        upsert_review_state(&mut conn, state).await
    }

    async fn list_due(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Vec<DueCard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS}, s.next_due, s.interval_days, s.ease_factor, s.review_count, s.last_reviewed \
             FROM cards c JOIN card_review_srs s \
               ON c.user_id=s.user_id AND c.language_id=s.language_id AND c.card_id=s.card_id \
             WHERE c.user_id=? AND c.language_id=? AND c.status='active' AND s.next_due <= ? \
             ORDER BY s.next_due ASC, c.created_at ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list due"))?;
        rows.iter()
            .map(|row| {
                Ok(DueCard {
                    card: row_into_card(row)?,
                    review: row_into_state(row)?,
                })
            })
            .collect()
    }

    async fn insert_review(&self, review: &Review) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        require_card_on(&mut conn, &review.scope, review.card_id).await?;
        insert_review_row(&mut conn, review).await
    }

    async fn record_grading(&self, state: &ReviewState, review: &Review) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err("sqlite begin"))?;
        require_card_on(&mut tx, &state.scope, state.card_id).await?;
        require_card_on(&mut tx, &review.scope, review.card_id).await?;
        upsert_review_state(&mut tx, state).await?;
        insert_review_row(&mut tx, review).await?;
        tx.commit().await.map_err(storage_err("sqlite commit grading"))
    }

    async fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Result<Vec<Review>, CoreError> {
        let card = card_id.map(|id| id.to_string());
        let rows = sqlx::query(
            r#"SELECT review_id,user_id,language_id,card_id,quality,reviewed_at,interval_applied,ease_after
               FROM card_reviews WHERE user_id=? AND language_id=? AND (? IS NULL OR card_id=?)
               ORDER BY reviewed_at ASC"#,
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card.clone())
        .bind(card)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list reviews"))?;
        rows.iter().map(row_into_review).collect()
    }

    // ===== Drill context =====
    async fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Result<Option<DrawPile>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,group_id,enabled,draw_pile_name,pile_size_limit,created_at \
             FROM translation_drill_draw_piles WHERE user_id=? AND language_id=? AND group_id=?",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read draw pile"))?;
        row.as_ref().map(row_into_pile).transpose()
    }

    async fn save_draw_pile(&self, pile: &DrawPile) -> Result<(), CoreError> {
        self.require_group(&pile.scope, pile.group_id).await?;
        sqlx::query(
            r#"
            INSERT INTO translation_drill_draw_piles (
              user_id, language_id, group_id, enabled, draw_pile_name, pile_size_limit, created_at
            ) VALUES (?,?,?,?,?,?,?)
            ON CONFLICT (user_id, language_id, group_id) DO UPDATE SET
              enabled=excluded.enabled, draw_pile_name=excluded.draw_pile_name,
              pile_size_limit=excluded.pile_size_limit
            "#,
        )
        .bind(&pile.scope.user_id)
        .bind(&pile.scope.language_id)
        .bind(pile.group_id.to_string())
        .bind(bool_to_i(pile.enabled))
        .bind(pile.name.clone())
        .bind(i64::from(pile.pile_size_limit))
        .bind(dt_to_str(pile.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err("sqlite save draw pile"))?;
        Ok(())
    }

    async fn list_draw_piles(&self, scope: &Scope) -> Result<Vec<DrawPile>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id,language_id,group_id,enabled,draw_pile_name,pile_size_limit,created_at \
             FROM translation_drill_draw_piles WHERE user_id=? AND language_id=? \
             ORDER BY created_at ASC, group_id ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list draw piles"))?;
        rows.iter().map(row_into_pile).collect()
    }

    async fn get_context_entry(
        &self,
        scope: &Scope,
        card_id: CardId,
    ) -> Result<Option<DrillContextEntry>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTEXT_COLS} FROM translation_drill_context t \
             WHERE t.user_id=? AND t.language_id=? AND t.card_id=?"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("sqlite read drill entry"))?;
        row.as_ref().map(row_into_entry).transpose()
    }

    async fn save_context_entry(&self, entry: &DrillContextEntry) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        require_card_on(&mut conn, &entry.scope, entry.card_id).await?;
        upsert_context_entry(&mut conn, entry).await
    }

    async fn list_context(
        &self,
        scope: &Scope,
        state: Option<DrillState>,
    ) -> Result<Vec<DrillContextEntry>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTEXT_COLS} FROM translation_drill_context t \
             WHERE t.user_id=? AND t.language_id=? AND (? IS NULL OR t.state=?) \
             ORDER BY t.added_at ASC, t.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(state.map(|s| s.as_str()))
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list drill entries"))?;
        rows.iter().map(row_into_entry).collect()
    }

    async fn list_active_context(&self, scope: &Scope) -> Result<Vec<ActiveDrillCard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS}, t.state, t.added_from, t.added_at, t.last_used, t.usage_count, \
                    t.state_until, t.cefr_override \
             FROM cards c JOIN translation_drill_context t \
               ON c.user_id=t.user_id AND c.language_id=t.language_id AND c.card_id=t.card_id \
             WHERE c.user_id=? AND c.language_id=? AND c.status='active' AND t.state='active' \
             ORDER BY t.added_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list active context"))?;
        rows.iter()
            .map(|row| {
                Ok(ActiveDrillCard {
                    card: row_into_card(row)?,
                    entry: row_into_entry(row)?,
                })
            })
            .collect()
    }

    async fn insert_drill_event(&self, event: &DrillEvent) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        require_card_on(&mut conn, &event.scope, event.card_id).await?;
        insert_event_row(&mut conn, event).await
    }

    async fn save_drill_changes(
        &self,
        entries: &[DrillContextEntry],
        events: &[DrillEvent],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err("sqlite begin"))?;
        for entry in entries {
            require_card_on(&mut tx, &entry.scope, entry.card_id).await?;
            upsert_context_entry(&mut tx, entry).await?;
        }
        for event in events {
            require_card_on(&mut tx, &event.scope, event.card_id).await?;
            insert_event_row(&mut tx, event).await?;
        }
        tx.commit().await.map_err(storage_err("sqlite commit drill changes"))
    }

    async fn list_drill_events(&self, scope: &Scope) -> Result<Vec<DrillEvent>, CoreError> {
        let rows = sqlx::query(
            "SELECT event_id,user_id,language_id,card_id,kind,at FROM translation_drill_events \
             WHERE user_id=? AND language_id=? ORDER BY at ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("sqlite list drill events"))?;
        rows.iter().map(row_into_event).collect()
    }
}

// ===== helpers =====
// ===== Statements shared by single writes and transactions =====

async fn card_exists_on(conn: &mut SqliteConnection, scope: &Scope, id: CardId) -> Result<bool, CoreError> {
    Ok(sqlx::query("SELECT 1 FROM cards WHERE user_id=? AND language_id=? AND card_id=? LIMIT 1")
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_err("sqlite read card"))?
        .is_some())
}

async fn require_card_on(conn: &mut SqliteConnection, scope: &Scope, id: CardId) -> Result<(), CoreError> {
    if card_exists_on(conn, scope, id).await? {
        Ok(())
    } else {
        Err(CoreError::NotFound("card"))
    }
}

async fn upsert_review_state(conn: &mut SqliteConnection, state: &ReviewState) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO card_review_srs (
          user_id, language_id, card_id, next_due, interval_days, ease_factor, review_count, last_reviewed
        ) VALUES (?,?,?,?,?,?,?,?)
        ON CONFLICT (user_id, language_id, card_id) DO UPDATE SET
          next_due=excluded.next_due, interval_days=excluded.interval_days,
          ease_factor=excluded.ease_factor, review_count=excluded.review_count,
          last_reviewed=excluded.last_reviewed
        "#,
    )
    .bind(&state.scope.user_id)
    .bind(&state.scope.language_id)
    .bind(state.card_id.to_string())
    .bind(state.next_due)
    .bind(i64::from(state.interval_days))
    .bind(f64::from(state.ease_factor))
    .bind(i64::from(state.review_count))
    .bind(state.last_reviewed)
    .execute(&mut *conn)
    .await
    .map_err(storage_err("sqlite save review state"))?;
    Ok(())
}

async fn insert_review_row(conn: &mut SqliteConnection, review: &Review) -> Result<(), CoreError> {
    sqlx::query(
        r#"INSERT INTO card_reviews (review_id,user_id,language_id,card_id,quality,reviewed_at,interval_applied,ease_after)
           VALUES (?,?,?,?,?,?,?,?)"#,
    )
    .bind(review.id.to_string())
    .bind(&review.scope.user_id)
    .bind(&review.scope.language_id)
    .bind(review.card_id.to_string())
    .bind(i64::from(review.quality.as_score()))
    .bind(dt_to_str(review.reviewed_at))
    .bind(i64::from(review.interval_applied))
    .bind(f64::from(review.ease_after))
    .execute(&mut *conn)
    .await
    .map_err(storage_err("sqlite insert review"))?;
    Ok(())
}

async fn upsert_context_entry(conn: &mut SqliteConnection, entry: &DrillContextEntry) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO translation_drill_context (
          user_id, language_id, card_id, state, added_from, added_at, last_used,
          usage_count, state_until, cefr_override
        ) VALUES (?,?,?,?,?,?,?,?,?,?)
        ON CONFLICT (user_id, language_id, card_id) DO UPDATE SET
          state=excluded.state, added_from=excluded.added_from, added_at=excluded.added_at,
          last_used=excluded.last_used, usage_count=excluded.usage_count,
          state_until=excluded.state_until, cefr_override=excluded.cefr_override
        "#,
    )
    .bind(&entry.scope.user_id)
    .bind(&entry.scope.language_id)
    .bind(entry.card_id.to_string())
    .bind(entry.state.as_str())
    .bind(entry.added_from.to_string())
    .bind(dt_to_str(entry.added_at))
    .bind(entry.last_used.map(dt_to_str))
    .bind(i64::from(entry.usage_count))
    .bind(entry.state_until.map(dt_to_str))
    .bind(entry.cefr_override.map(|c| c.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(storage_err("sqlite save drill entry"))?;
    Ok(())
}

async fn insert_event_row(conn: &mut SqliteConnection, event: &DrillEvent) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO translation_drill_events (event_id,user_id,language_id,card_id,kind,at) VALUES (?,?,?,?,?,?)",
    )
    .bind(event.id.to_string())
    .bind(&event.scope.user_id)
    .bind(&event.scope.language_id)
    .bind(event.card_id.to_string())
    .bind(event.kind.as_str())
    .bind(dt_to_str(event.at))
    .execute(&mut *conn)
    .await
    .map_err(storage_err("sqlite insert drill event"))?;
    Ok(())
}

fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn uuid_from_str(s: String) -> Result<Uuid, CoreError> {
    Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

fn bool_to_i(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

fn list_to_json(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn scope_of(row: &SqliteRow) -> Scope {
    Scope::new(
        row.get::<String, _>("user_id"),
        row.get::<String, _>("language_id"),
    )
}

fn row_into_card(row: &SqliteRow) -> Result<Card, CoreError> {
    let examples: String = row.get("examples");
    let mnemonics: String = row.get("mnemonics");
    Ok(Card {
        scope: scope_of(row),
        id: uuid_from_str(row.get::<String, _>("card_id"))?,
        content: row.get::<String, _>("content"),
        meaning: row.get::<Option<String>, _>("meaning"),
        card_type: row.get::<String, _>("card_type").parse()?,
        status: row.get::<String, _>("status").parse()?,
        examples: serde_json::from_str(&examples).unwrap_or_default(),
        mnemonics: serde_json::from_str(&mnemonics).unwrap_or_default(),
        llm_instructions: row.get::<Option<String>, _>("llm_instructions"),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        updated_at: dt_from_str(row.get::<String, _>("updated_at"))?,
    })
}

fn row_into_group(row: &SqliteRow) -> Result<Group, CoreError> {
    Ok(Group {
        scope: scope_of(row),
        id: uuid_from_str(row.get::<String, _>("group_id"))?,
        name: row.get::<String, _>("group_name"),
        description: row.get::<Option<String>, _>("description"),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

fn row_into_state(row: &SqliteRow) -> Result<ReviewState, CoreError> {
    Ok(ReviewState {
        scope: scope_of(row),
        card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
        next_due: row.get::<i64, _>("next_due"),
        interval_days: row.get::<i64, _>("interval_days") as u32,
        ease_factor: row.get::<f64, _>("ease_factor") as f32,
        review_count: row.get::<i64, _>("review_count") as u32,
        last_reviewed: row.get::<Option<i64>, _>("last_reviewed"),
    })
}

fn row_into_review(row: &SqliteRow) -> Result<Review, CoreError> {
    Ok(Review {
        id: uuid_from_str(row.get::<String, _>("review_id"))?,
        scope: scope_of(row),
        card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
        quality: Quality::from_score(row.get::<i64, _>("quality") as i32)
            .ok_or(CoreError::Invalid("quality"))?,
        reviewed_at: dt_from_str(row.get::<String, _>("reviewed_at"))?,
        interval_applied: row.get::<i64, _>("interval_applied") as u32,
        ease_after: row.get::<f64, _>("ease_after") as f32,
    })
}

fn row_into_pile(row: &SqliteRow) -> Result<DrawPile, CoreError> {
    Ok(DrawPile {
        scope: scope_of(row),
        group_id: uuid_from_str(row.get::<String, _>("group_id"))?,
        enabled: row.get::<i64, _>("enabled") != 0,
        name: row.get::<Option<String>, _>("draw_pile_name"),
        pile_size_limit: row.get::<i64, _>("pile_size_limit") as u32,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

fn row_into_entry(row: &SqliteRow) -> Result<DrillContextEntry, CoreError> {
    Ok(DrillContextEntry {
        scope: scope_of(row),
        card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
        state: row.get::<String, _>("state").parse()?,
        added_from: row.get::<String, _>("added_from").parse()?,
        added_at: dt_from_str(row.get::<String, _>("added_at"))?,
        last_used: row
            .get::<Option<String>, _>("last_used")
            .map(dt_from_str)
            .transpose()?,
        usage_count: row.get::<i64, _>("usage_count") as u32,
        state_until: row
            .get::<Option<String>, _>("state_until")
            .map(dt_from_str)
            .transpose()?,
        cefr_override: row
            .get::<Option<String>, _>("cefr_override")
            .map(|s| s.parse())
            .transpose()?,
    })
}

fn row_into_event(row: &SqliteRow) -> Result<DrillEvent, CoreError> {
    Ok(DrillEvent {
        id: uuid_from_str(row.get::<String, _>("event_id"))?,
        scope: scope_of(row),
        card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
        kind: row.get::<String, _>("kind").parse()?,
        at: dt_from_str(row.get::<String, _>("at"))?,
    })
}
