use chrono::{DateTime, Utc};
use lingodrill_core::{
    repo::Repository, storage_err, ActiveDrillCard, Card, CardGroup, CardId, CardStatus, CoreError,
    DrawPile, DrillContextEntry, DrillEvent, DrillState, DueCard, Group, GroupId, Quality, Review,
    ReviewState, Scope,
};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

// Ids are generated in the app, so the schema needs no extensions.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cards (
  user_id           text NOT NULL,
  language_id       text NOT NULL,
  card_id           uuid NOT NULL,
  content           text NOT NULL,
  meaning           text,
  card_type         text NOT NULL DEFAULT 'word',
  status            text NOT NULL DEFAULT 'active',
  examples          text[] NOT NULL DEFAULT '{}',
  mnemonics         text[] NOT NULL DEFAULT '{}',
  llm_instructions  text,
  created_at        timestamptz NOT NULL,
  updated_at        timestamptz NOT NULL,
  PRIMARY KEY (user_id, language_id, card_id)
);

CREATE INDEX IF NOT EXISTS idx_cards_status ON cards (user_id, language_id, status, updated_at);

CREATE TABLE IF NOT EXISTS study_groups (
  user_id      text NOT NULL,
  language_id  text NOT NULL,
  group_id     uuid NOT NULL,
  group_name   text NOT NULL,
  description  text,
  created_at   timestamptz NOT NULL,
  PRIMARY KEY (user_id, language_id, group_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_name ON study_groups (user_id, language_id, lower(group_name));

CREATE TABLE IF NOT EXISTS card_groups (
  user_id      text NOT NULL,
  language_id  text NOT NULL,
  card_id      uuid NOT NULL,
  group_id     uuid NOT NULL,
  assigned_at  timestamptz NOT NULL,
  PRIMARY KEY (user_id, language_id, card_id, group_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE,
  FOREIGN KEY (user_id, language_id, group_id) REFERENCES study_groups (user_id, language_id, group_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS card_review_srs (
  user_id        text NOT NULL,
  language_id    text NOT NULL,
  card_id        uuid NOT NULL,
  next_due       bigint  NOT NULL DEFAULT 0,
  interval_days  integer NOT NULL DEFAULT 1,
  ease_factor    real    NOT NULL DEFAULT 2.5,
  review_count   integer NOT NULL DEFAULT 0,
  last_reviewed  bigint,
  PRIMARY KEY (user_id, language_id, card_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_card_review_srs_due ON card_review_srs (user_id, language_id, next_due);

CREATE TABLE IF NOT EXISTS card_reviews (
  review_id         uuid PRIMARY KEY,
  user_id           text NOT NULL,
  language_id       text NOT NULL,
  card_id           uuid NOT NULL,
  quality           smallint NOT NULL,
  reviewed_at       timestamptz NOT NULL,
  interval_applied  integer NOT NULL,
  ease_after        real NOT NULL,
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_card_reviews_time ON card_reviews (user_id, language_id, reviewed_at);

CREATE TABLE IF NOT EXISTS translation_drill_draw_piles (
  user_id          text NOT NULL,
  language_id      text NOT NULL,
  group_id         uuid NOT NULL,
  enabled          boolean NOT NULL DEFAULT true,
  draw_pile_name   text,
  pile_size_limit  integer NOT NULL DEFAULT 10,
  created_at       timestamptz NOT NULL,
  PRIMARY KEY (user_id, language_id, group_id),
  FOREIGN KEY (user_id, language_id, group_id) REFERENCES study_groups (user_id, language_id, group_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS translation_drill_context (
  user_id        text NOT NULL,
  language_id    text NOT NULL,
  card_id        uuid NOT NULL,
  state          text NOT NULL DEFAULT 'active',
  added_from     text NOT NULL,
  added_at       timestamptz NOT NULL,
  last_used      timestamptz,
  usage_count    integer NOT NULL DEFAULT 0,
  state_until    timestamptz,
  cefr_override  text,
  PRIMARY KEY (user_id, language_id, card_id),
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_translation_context_state ON translation_drill_context (user_id, language_id, state);

CREATE TABLE IF NOT EXISTS translation_drill_events (
  event_id     uuid PRIMARY KEY,
  user_id      text NOT NULL,
  language_id  text NOT NULL,
  card_id      uuid NOT NULL,
  kind         text NOT NULL,
  at           timestamptz NOT NULL,
  FOREIGN KEY (user_id, language_id, card_id) REFERENCES cards (user_id, language_id, card_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_translation_drill_events_time ON translation_drill_events (user_id, language_id, at)
"#;

const CARD_COLS: &str = "c.user_id, c.language_id, c.card_id, c.content, c.meaning, c.card_type, c.status, \
     c.examples, c.mnemonics, c.llm_instructions, c.created_at, c.updated_at";

const CONTEXT_COLS: &str = "t.user_id, t.language_id, t.card_id, t.state, t.added_from, t.added_at, \
     t.last_used, t.usage_count, t.state_until, t.cefr_override";

pub struct PostgresRepo {
    pool: PgPool,
}

impl PostgresRepo {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(storage_err("pg connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        tracing::debug!("postgres store connected");
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        for chunk in SCHEMA.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err("pg schema"))?;
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

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, CoreError> {
        self.pool.acquire().await.map_err(storage_err("pg acquire"))
    }

    /// Name clash check with Rust's Unicode folding, matching the other stores
    /// whatever collation the server's `lower()` uses.
    async fn group_name_taken(&self, scope: &Scope, name: &str, except: Option<GroupId>) -> Result<bool, CoreError> {
        Ok(self
            .list_groups(scope)
            .await?
            .iter()
            .any(|g| Some(g.id) != except && g.name_matches(name)))
    }

    async fn require_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        let found = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM study_groups WHERE user_id=$1 AND language_id=$2 AND group_id=$3 LIMIT 1",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read group"))?
        .is_some();
        if found {
            Ok(())
        } else {
            Err(CoreError::NotFound("group"))
        }
    }
}

#[async_trait::async_trait]
impl Repository for PostgresRepo {
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
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(&card.scope.user_id)
        .bind(&card.scope.language_id)
        .bind(card.id)
        .bind(&card.content)
        .bind(card.meaning.clone())
        .bind(card.card_type.as_str())
        .bind(card.status.as_str())
        .bind(card.examples.clone())
        .bind(card.mnemonics.clone())
        .bind(card.llm_instructions.clone())
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg insert card"))?;
        Ok(card.clone())
    }

    async fn get_card(&self, scope: &Scope, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards c WHERE c.user_id=$1 AND c.language_id=$2 AND c.card_id=$3"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(&row)
    }

    async fn list_cards(&self, scope: &Scope, status: Option<CardStatus>) -> Result<Vec<Card>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards c \
             WHERE c.user_id=$1 AND c.language_id=$2 AND ($3::text IS NULL OR c.status=$3) \
             ORDER BY c.created_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list cards"))?;
        rows.iter().map(row_into_card).collect()
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              content=$1, meaning=$2, card_type=$3, status=$4, examples=$5, mnemonics=$6,
              llm_instructions=$7, updated_at=$8
            WHERE user_id=$9 AND language_id=$10 AND card_id=$11
            "#,
        )
        .bind(&card.content)
        .bind(card.meaning.clone())
        .bind(card.card_type.as_str())
        .bind(card.status.as_str())
        .bind(card.examples.clone())
        .bind(card.mnemonics.clone())
        .bind(card.llm_instructions.clone())
        .bind(card.updated_at)
        .bind(&card.scope.user_id)
        .bind(&card.scope.language_id)
        .bind(card.id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, scope: &Scope, id: CardId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM cards WHERE user_id=$1 AND language_id=$2 AND card_id=$3")
            .bind(&scope.user_id)
            .bind(&scope.language_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err("pg del card"))?;
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
            "INSERT INTO study_groups (user_id,language_id,group_id,group_name,description,created_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group.id)
        .bind(&group.name)
        .bind(group.description.clone())
        .bind(group.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg insert group"))?;
        Ok(group)
    }

    async fn get_group(&self, scope: &Scope, id: GroupId) -> Result<Group, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,group_id,group_name,description,created_at FROM study_groups \
             WHERE user_id=$1 AND language_id=$2 AND group_id=$3",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read group"))?;
        let row = row.ok_or(CoreError::NotFound("group"))?;
        Ok(row_into_group(&row))
    }

    async fn list_groups(&self, scope: &Scope) -> Result<Vec<Group>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id,language_id,group_id,group_name,description,created_at FROM study_groups \
             WHERE user_id=$1 AND language_id=$2 ORDER BY lower(group_name) ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list groups"))?;
        Ok(rows.iter().map(row_into_group).collect())
    }

    async fn update_group(&self, group: &Group) -> Result<Group, CoreError> {
        self.require_group(&group.scope, group.id).await?;
        if self.group_name_taken(&group.scope, &group.name, Some(group.id)).await? {
            return Err(CoreError::Conflict("group name already exists"));
        }
        sqlx::query(
            "UPDATE study_groups SET group_name=$1, description=$2 \
             WHERE user_id=$3 AND language_id=$4 AND group_id=$5",
        )
        .bind(&group.name)
        .bind(group.description.clone())
        .bind(&group.scope.user_id)
        .bind(&group.scope.language_id)
        .bind(group.id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg update group"))?;
        self.get_group(&group.scope, group.id).await
    }

    async fn delete_group(&self, scope: &Scope, id: GroupId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM study_groups WHERE user_id=$1 AND language_id=$2 AND group_id=$3")
            .bind(&scope.user_id)
            .bind(&scope.language_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err("pg del group"))?;
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
            "INSERT INTO card_groups (user_id,language_id,card_id,group_id,assigned_at) \
             VALUES ($1,$2,$3,$4,$5) ON CONFLICT DO NOTHING",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .bind(group_id)
        .bind(m.assigned_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg assign card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::Conflict("card already in group"));
        }
        Ok(m)
    }

    async fn unassign_card(&self, scope: &Scope, card_id: CardId, group_id: GroupId) -> Result<(), CoreError> {
        let res = sqlx::query(
            "DELETE FROM card_groups WHERE user_id=$1 AND language_id=$2 AND card_id=$3 AND group_id=$4",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg unassign card"))?;
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
             WHERE g.user_id=$1 AND g.language_id=$2 AND g.group_id=$3 \
             ORDER BY g.assigned_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list group cards"))?;
        rows.iter().map(row_into_card).collect()
    }

    async fn list_card_groups(&self, scope: &Scope, card_id: CardId) -> Result<Vec<Group>, CoreError> {
        self.require_card(scope, card_id).await?;
        let rows = sqlx::query(
            "SELECT g.user_id,g.language_id,g.group_id,g.group_name,g.description,g.created_at \
             FROM study_groups g JOIN card_groups m \
               ON g.user_id=m.user_id AND g.language_id=m.language_id AND g.group_id=m.group_id \
             WHERE m.user_id=$1 AND m.language_id=$2 AND m.card_id=$3 \
             ORDER BY lower(g.group_name) ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list card groups"))?;
        Ok(rows.iter().map(row_into_group).collect())
    }

    // ===== Review scheduling =====
    async fn get_review_state(&self, scope: &Scope, card_id: CardId) -> Result<Option<ReviewState>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,card_id,next_due,interval_days,ease_factor,review_count,last_reviewed \
             FROM card_review_srs WHERE user_id=$1 AND language_id=$2 AND card_id=$3",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read review state"))?;
        Ok(row.as_ref().map(row_into_state))
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
             WHERE c.user_id=$1 AND c.language_id=$2 AND c.status='active' AND s.next_due <= $3 \
             ORDER BY s.next_due ASC, c.created_at ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list due"))?;
        rows.iter()
            .map(|row| {
                Ok(DueCard {
                    card: row_into_card(row)?,
                    review: row_into_state(row),
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
        let mut tx = self.pool.begin().await.map_err(storage_err("pg begin"))?;
        require_card_on(&mut tx, &state.scope, state.card_id).await?;
        require_card_on(&mut tx, &review.scope, review.card_id).await?;
        upsert_review_state(&mut tx, state).await?;
        insert_review_row(&mut tx, review).await?;
        tx.commit().await.map_err(storage_err("pg commit grading"))
    }

    async fn list_reviews(&self, scope: &Scope, card_id: Option<CardId>) -> Result<Vec<Review>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT review_id,user_id,language_id,card_id,quality,reviewed_at,interval_applied,ease_after
               FROM card_reviews WHERE user_id=$1 AND language_id=$2 AND ($3::uuid IS NULL OR card_id=$3)
               ORDER BY reviewed_at ASC"#,
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list reviews"))?;
        rows.iter().map(row_into_review).collect()
    }

    // ===== Drill context =====
    async fn get_draw_pile(&self, scope: &Scope, group_id: GroupId) -> Result<Option<DrawPile>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id,language_id,group_id,enabled,draw_pile_name,pile_size_limit,created_at \
             FROM translation_drill_draw_piles WHERE user_id=$1 AND language_id=$2 AND group_id=$3",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read draw pile"))?;
        Ok(row.as_ref().map(row_into_pile))
    }

    async fn save_draw_pile(&self, pile: &DrawPile) -> Result<(), CoreError> {
        self.require_group(&pile.scope, pile.group_id).await?;
        sqlx::query(
            r#"
            INSERT INTO translation_drill_draw_piles (
              user_id, language_id, group_id, enabled, draw_pile_name, pile_size_limit, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (user_id, language_id, group_id) DO UPDATE SET
              enabled=EXCLUDED.enabled, draw_pile_name=EXCLUDED.draw_pile_name,
              pile_size_limit=EXCLUDED.pile_size_limit
            "#,
        )
        .bind(&pile.scope.user_id)
        .bind(&pile.scope.language_id)
        .bind(pile.group_id)
        .bind(pile.enabled)
        .bind(pile.name.clone())
        .bind(int4(pile.pile_size_limit)?)
        .bind(pile.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err("pg save draw pile"))?;
        Ok(())
    }

    async fn list_draw_piles(&self, scope: &Scope) -> Result<Vec<DrawPile>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id,language_id,group_id,enabled,draw_pile_name,pile_size_limit,created_at \
             FROM translation_drill_draw_piles WHERE user_id=$1 AND language_id=$2 \
             ORDER BY created_at ASC, group_id ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list draw piles"))?;
        Ok(rows.iter().map(row_into_pile).collect())
    }

    async fn get_context_entry(
        &self,
        scope: &Scope,
        card_id: CardId,
    ) -> Result<Option<DrillContextEntry>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTEXT_COLS} FROM translation_drill_context t \
             WHERE t.user_id=$1 AND t.language_id=$2 AND t.card_id=$3"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("pg read drill entry"))?;
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
             WHERE t.user_id=$1 AND t.language_id=$2 AND ($3::text IS NULL OR t.state=$3) \
             ORDER BY t.added_at ASC, t.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list drill entries"))?;
        rows.iter().map(row_into_entry).collect()
    }

    async fn list_active_context(&self, scope: &Scope) -> Result<Vec<ActiveDrillCard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS}, t.state, t.added_from, t.added_at, t.last_used, t.usage_count, \
                    t.state_until, t.cefr_override \
             FROM cards c JOIN translation_drill_context t \
               ON c.user_id=t.user_id AND c.language_id=t.language_id AND c.card_id=t.card_id \
             WHERE c.user_id=$1 AND c.language_id=$2 AND c.status='active' AND t.state='active' \
             ORDER BY t.added_at ASC, c.card_id ASC"
        ))
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list active context"))?;
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
        let mut tx = self.pool.begin().await.map_err(storage_err("pg begin"))?;
        for entry in entries {
            require_card_on(&mut tx, &entry.scope, entry.card_id).await?;
            upsert_context_entry(&mut tx, entry).await?;
        }
        for event in events {
            require_card_on(&mut tx, &event.scope, event.card_id).await?;
            insert_event_row(&mut tx, event).await?;
        }
        tx.commit().await.map_err(storage_err("pg commit drill changes"))
    }

    async fn list_drill_events(&self, scope: &Scope) -> Result<Vec<DrillEvent>, CoreError> {
        let rows = sqlx::query(
            "SELECT event_id,user_id,language_id,card_id,kind,at FROM translation_drill_events \
             WHERE user_id=$1 AND language_id=$2 ORDER BY at ASC",
        )
        .bind(&scope.user_id)
        .bind(&scope.language_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("pg list drill events"))?;
        rows.iter().map(row_into_event).collect()
    }
}

// ===== Statements shared by single writes and transactions =====

/// `integer` columns hold counts and day intervals; refuse values that would wrap.
fn int4(v: u32) -> Result<i32, CoreError> {
    i32::try_from(v).map_err(|_| CoreError::Invalid("value too large for an integer column"))
}

async fn card_exists_on(conn: &mut PgConnection, scope: &Scope, id: CardId) -> Result<bool, CoreError> {
    Ok(sqlx::query_scalar::<_, i32>(
        "SELECT 1 FROM cards WHERE user_id=$1 AND language_id=$2 AND card_id=$3 LIMIT 1",
    )
    .bind(&scope.user_id)
    .bind(&scope.language_id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_err("pg read card"))?
    .is_some())
}

async fn require_card_on(conn: &mut PgConnection, scope: &Scope, id: CardId) -> Result<(), CoreError> {
    if card_exists_on(conn, scope, id).await? {
        Ok(())
    } else {
        Err(CoreError::NotFound("card"))
    }
}

async fn upsert_review_state(conn: &mut PgConnection, state: &ReviewState) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO card_review_srs (
          user_id, language_id, card_id, next_due, interval_days, ease_factor, review_count, last_reviewed
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        ON CONFLICT (user_id, language_id, card_id) DO UPDATE SET
          next_due=EXCLUDED.next_due, interval_days=EXCLUDED.interval_days,
          ease_factor=EXCLUDED.ease_factor, review_count=EXCLUDED.review_count,
          last_reviewed=EXCLUDED.last_reviewed
        "#,
    )
    .bind(&state.scope.user_id)
    .bind(&state.scope.language_id)
    .bind(state.card_id)
    .bind(state.next_due)
    .bind(int4(state.interval_days)?)
    .bind(state.ease_factor)
    .bind(int4(state.review_count)?)
    .bind(state.last_reviewed)
    .execute(&mut *conn)
    .await
    .map_err(storage_err("pg save review state"))?;
    Ok(())
}

async fn insert_review_row(conn: &mut PgConnection, review: &Review) -> Result<(), CoreError> {
    sqlx::query(
        r#"INSERT INTO card_reviews (review_id,user_id,language_id,card_id,quality,reviewed_at,interval_applied,ease_after)
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
    )
    .bind(review.id)
    .bind(&review.scope.user_id)
    .bind(&review.scope.language_id)
    .bind(review.card_id)
    .bind(review.quality.as_score() as i16)
    .bind(review.reviewed_at)
    .bind(int4(review.interval_applied)?)
    .bind(review.ease_after)
    .execute(&mut *conn)
    .await
    .map_err(storage_err("pg insert review"))?;
    Ok(())
}

async fn upsert_context_entry(conn: &mut PgConnection, entry: &DrillContextEntry) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO translation_drill_context (
          user_id, language_id, card_id, state, added_from, added_at, last_used,
          usage_count, state_until, cefr_override
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        ON CONFLICT (user_id, language_id, card_id) DO UPDATE SET
          state=EXCLUDED.state, added_from=EXCLUDED.added_from, added_at=EXCLUDED.added_at,
          last_used=EXCLUDED.last_used, usage_count=EXCLUDED.usage_count,
          state_until=EXCLUDED.state_until, cefr_override=EXCLUDED.cefr_override
        "#,
    )
    .bind(&entry.scope.user_id)
    .bind(&entry.scope.language_id)
    .bind(entry.card_id)
    .bind(entry.state.as_str())
    .bind(entry.added_from.to_string())
    .bind(entry.added_at)
    .bind(entry.last_used)
    .bind(int4(entry.usage_count)?)
    .bind(entry.state_until)
    .bind(entry.cefr_override.map(|c| c.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(storage_err("pg save drill entry"))?;
    Ok(())
}

async fn insert_event_row(conn: &mut PgConnection, event: &DrillEvent) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO translation_drill_events (event_id,user_id,language_id,card_id,kind,at) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(event.id)
    .bind(&event.scope.user_id)
    .bind(&event.scope.language_id)
    .bind(event.card_id)
    .bind(event.kind.as_str())
    .bind(event.at)
    .execute(&mut *conn)
    .await
    .map_err(storage_err("pg insert drill event"))?;
    Ok(())
}

fn scope_of(row: &PgRow) -> Scope {
    Scope::new(
        row.get::<String, _>("user_id"),
        row.get::<String, _>("language_id"),
    )
}

fn row_into_card(row: &PgRow) -> Result<Card, CoreError> {
    Ok(Card {
        scope: scope_of(row),
        id: row.get::<Uuid, _>("card_id"),
        content: row.get::<String, _>("content"),
        meaning: row.get::<Option<String>, _>("meaning"),
        card_type: row.get::<String, _>("card_type").parse()?,
        status: row.get::<String, _>("status").parse()?,
        examples: row.get::<Vec<String>, _>("examples"),
        mnemonics: row.get::<Vec<String>, _>("mnemonics"),
        llm_instructions: row.get::<Option<String>, _>("llm_instructions"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn row_into_group(row: &PgRow) -> Group {
    Group {
        scope: scope_of(row),
        id: row.get::<Uuid, _>("group_id"),
        name: row.get::<String, _>("group_name"),
        description: row.get::<Option<String>, _>("description"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

fn row_into_state(row: &PgRow) -> ReviewState {
    ReviewState {
        scope: scope_of(row),
        card_id: row.get::<Uuid, _>("card_id"),
        next_due: row.get::<i64, _>("next_due"),
        interval_days: row.get::<i32, _>("interval_days").max(0) as u32,
        ease_factor: row.get::<f32, _>("ease_factor"),
        review_count: row.get::<i32, _>("review_count").max(0) as u32,
        last_reviewed: row.get::<Option<i64>, _>("last_reviewed"),
    }
}

fn row_into_review(row: &PgRow) -> Result<Review, CoreError> {
    Ok(Review {
        id: row.get::<Uuid, _>("review_id"),
        scope: scope_of(row),
        card_id: row.get::<Uuid, _>("card_id"),
        quality: Quality::from_score(row.get::<i16, _>("quality") as i32)
            .ok_or(CoreError::Invalid("quality"))?,
        reviewed_at: row.get::<DateTime<Utc>, _>("reviewed_at"),
        interval_applied: row.get::<i32, _>("interval_applied").max(0) as u32,
        ease_after: row.get::<f32, _>("ease_after"),
    })
}

fn row_into_pile(row: &PgRow) -> DrawPile {
    DrawPile {
        scope: scope_of(row),
        group_id: row.get::<Uuid, _>("group_id"),
        enabled: row.get::<bool, _>("enabled"),
        name: row.get::<Option<String>, _>("draw_pile_name"),
        pile_size_limit: row.get::<i32, _>("pile_size_limit").max(0) as u32,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

fn row_into_entry(row: &PgRow) -> Result<DrillContextEntry, CoreError> {
    Ok(DrillContextEntry {
        scope: scope_of(row),
        card_id: row.get::<Uuid, _>("card_id"),
        state: row.get::<String, _>("state").parse()?,
        added_from: row.get::<String, _>("added_from").parse()?,
        added_at: row.get::<DateTime<Utc>, _>("added_at"),
        last_used: row.get::<Option<DateTime<Utc>>, _>("last_used"),
        usage_count: row.get::<i32, _>("usage_count").max(0) as u32,
        state_until: row.get::<Option<DateTime<Utc>>, _>("state_until"),
        cefr_override: row
            .get::<Option<String>, _>("cefr_override")
            .map(|s| s.parse())
            .transpose()?,
    })
}

fn row_into_event(row: &PgRow) -> Result<DrillEvent, CoreError> {
    Ok(DrillEvent {
        id: row.get::<Uuid, _>("event_id"),
        scope: scope_of(row),
        card_id: row.get::<Uuid, _>("card_id"),
        kind: row.get::<String, _>("kind").parse()?,
        at: row.get::<DateTime<Utc>, _>("at"),
    })
}
