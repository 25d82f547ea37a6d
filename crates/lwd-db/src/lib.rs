//! lwd-db
//!
//! Postgres-backed `SessionStore`. Weights are stored as integer grams;
//! enums as their lowercase wire names.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use lwd_schemas::{
    CaptureRecord, Grams, LorrySession, SessionStatus, TareEntry, ToleranceStatus, WeightBasis,
};
use lwd_session::{SessionStore, StoreError};

pub const ENV_DB_URL: &str = "LWD_DATABASE_URL";

/// Connect using `LWD_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::info!("db migrations applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

const SESSION_COLUMNS: &str = "id, lorry_number, line, line_manager, tare_weight_g, status, \
     total_bags, created_at, activated_at, completed_at";

const CAPTURE_COLUMNS: &str = "id, session_id, tag_id, controller_weight_g, scale_weight_g, \
     final_weight_g, tare_weight_g, net_weight_g, weight_source, tolerance_status, \
     weight_difference_g, needs_review, created_at";

fn session_from_row(row: &PgRow) -> Result<LorrySession, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let total_bags: i32 = row.try_get("total_bags").map_err(backend)?;
    Ok(LorrySession {
        id: row.try_get("id").map_err(backend)?,
        lorry_number: row.try_get("lorry_number").map_err(backend)?,
        line: row.try_get("line").map_err(backend)?,
        line_manager: row.try_get("line_manager").map_err(backend)?,
        tare_weight: Grams::new(row.try_get("tare_weight_g").map_err(backend)?),
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown session status '{status}'")))?,
        total_bags: u32::try_from(total_bags)
            .map_err(|_| StoreError::Corrupt(format!("negative total_bags {total_bags}")))?,
        created_at: row.try_get("created_at").map_err(backend)?,
        activated_at: row.try_get("activated_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
    })
}

fn capture_from_row(row: &PgRow) -> Result<CaptureRecord, StoreError> {
    let source: String = row.try_get("weight_source").map_err(backend)?;
    let status: String = row.try_get("tolerance_status").map_err(backend)?;
    let opt_grams = |col: &str| -> Result<Option<Grams>, StoreError> {
        Ok(row
            .try_get::<Option<i64>, _>(col)
            .map_err(backend)?
            .map(Grams::new))
    };
    let grams = |col: &str| -> Result<Grams, StoreError> {
        Ok(Grams::new(row.try_get::<i64, _>(col).map_err(backend)?))
    };

    Ok(CaptureRecord {
        id: row.try_get("id").map_err(backend)?,
        session_id: row.try_get("session_id").map_err(backend)?,
        tag_id: row.try_get("tag_id").map_err(backend)?,
        controller_weight: opt_grams("controller_weight_g")?,
        scale_weight: opt_grams("scale_weight_g")?,
        final_weight: grams("final_weight_g")?,
        tare_weight: grams("tare_weight_g")?,
        net_weight: grams("net_weight_g")?,
        weight_source: parse_basis(&source)?,
        tolerance_status: parse_tolerance_status(&status)?,
        weight_difference: grams("weight_difference_g")?,
        needs_review: row.try_get("needs_review").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn basis_str(b: WeightBasis) -> &'static str {
    match b {
        WeightBasis::Controller => "controller",
        WeightBasis::Scale => "scale",
        WeightBasis::Average => "average",
    }
}

fn parse_basis(s: &str) -> Result<WeightBasis, StoreError> {
    match s {
        "controller" => Ok(WeightBasis::Controller),
        "scale" => Ok(WeightBasis::Scale),
        "average" => Ok(WeightBasis::Average),
        other => Err(StoreError::Corrupt(format!("unknown weight_source '{other}'"))),
    }
}

fn tolerance_status_str(s: ToleranceStatus) -> &'static str {
    match s {
        ToleranceStatus::Good => "good",
        ToleranceStatus::Warning => "warning",
        ToleranceStatus::Error => "error",
    }
}

fn parse_tolerance_status(s: &str) -> Result<ToleranceStatus, StoreError> {
    match s {
        "good" => Ok(ToleranceStatus::Good),
        "warning" => Ok(ToleranceStatus::Warning),
        "error" => Ok(ToleranceStatus::Error),
        other => Err(StoreError::Corrupt(format!(
            "unknown tolerance_status '{other}'"
        ))),
    }
}

fn bags_i32(n: u32) -> Result<i32, StoreError> {
    i32::try_from(n).map_err(|_| StoreError::Backend(format!("total_bags {n} out of range")))
}

/// Full-row replace shared by `update_session` and `append_capture`.
async fn update_session_row(conn: &mut PgConnection, s: &LorrySession) -> Result<bool, StoreError> {
    let res = sqlx::query(
        r#"
        update lorry_sessions set
          lorry_number = $2,
          line = $3,
          line_manager = $4,
          tare_weight_g = $5,
          status = $6,
          total_bags = $7,
          activated_at = $8,
          completed_at = $9
        where id = $1
        "#,
    )
    .bind(s.id)
    .bind(&s.lorry_number)
    .bind(&s.line)
    .bind(&s.line_manager)
    .bind(s.tare_weight.raw())
    .bind(s.status.as_str())
    .bind(bags_i32(s.total_bags)?)
    .bind(s.activated_at)
    .bind(s.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(res.rows_affected() == 1)
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, s: &LorrySession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into lorry_sessions (
              id, lorry_number, line, line_manager, tare_weight_g, status,
              total_bags, created_at, activated_at, completed_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
        )
        .bind(s.id)
        .bind(&s.lorry_number)
        .bind(&s.line)
        .bind(&s.line_manager)
        .bind(s.tare_weight.raw())
        .bind(s.status.as_str())
        .bind(bags_i32(s.total_bags)?)
        .bind(s.created_at)
        .bind(s.activated_at)
        .bind(s.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<LorrySession>, StoreError> {
        let sql = format!("select {SESSION_COLUMNS} from lorry_sessions where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<LorrySession>, StoreError> {
        let sql = format!("select {SESSION_COLUMNS} from lorry_sessions order by created_at, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(session_from_row).collect()
    }

    async fn find_active(&self) -> Result<Option<LorrySession>, StoreError> {
        let sql = format!("select {SESSION_COLUMNS} from lorry_sessions where status = 'active'");
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session(&self, s: &LorrySession) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        update_session_row(&mut conn, s).await
    }

    async fn remove_session(&self, id: Uuid, purge_captures: bool) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let res = sqlx::query("delete from lorry_sessions where id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if res.rows_affected() != 1 {
            tx.rollback().await.map_err(backend)?;
            return Ok(None);
        }

        let purged = if purge_captures {
            sqlx::query("delete from capture_records where session_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?
                .rows_affected()
        } else {
            0
        };
        tx.commit().await.map_err(backend)?;
        Ok(Some(purged))
    }

    async fn append_capture(&self, s: &LorrySession, c: &CaptureRecord) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if !update_session_row(&mut tx, s).await? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            insert into capture_records (
              id, session_id, tag_id, controller_weight_g, scale_weight_g,
              final_weight_g, tare_weight_g, net_weight_g, weight_source,
              tolerance_status, weight_difference_g, needs_review, created_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(c.id)
        .bind(c.session_id)
        .bind(&c.tag_id)
        .bind(c.controller_weight.map(Grams::raw))
        .bind(c.scale_weight.map(Grams::raw))
        .bind(c.final_weight.raw())
        .bind(c.tare_weight.raw())
        .bind(c.net_weight.raw())
        .bind(basis_str(c.weight_source))
        .bind(tolerance_status_str(c.tolerance_status))
        .bind(c.weight_difference.raw())
        .bind(c.needs_review)
        .bind(c.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn list_captures(&self, session_id: Uuid) -> Result<Vec<CaptureRecord>, StoreError> {
        let sql = format!(
            "select {CAPTURE_COLUMNS} from capture_records where session_id = $1 order by created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(capture_from_row).collect()
    }

    async fn get_tare(&self, day: NaiveDate) -> Result<Option<TareEntry>, StoreError> {
        let row = sqlx::query(
            "select day, tare_weight_g, updated_at from tare_entries where day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|r| {
            Ok(TareEntry {
                day: r.try_get("day").map_err(backend)?,
                tare_weight: Grams::new(r.try_get("tare_weight_g").map_err(backend)?),
                updated_at: r.try_get("updated_at").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn put_tare(&self, entry: &TareEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into tare_entries (day, tare_weight_g, updated_at)
            values ($1, $2, $3)
            on conflict (day) do update
              set tare_weight_g = excluded.tare_weight_g,
                  updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.day)
        .bind(entry.tare_weight.raw())
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
