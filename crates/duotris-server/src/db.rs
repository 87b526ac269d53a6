use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use duotris_core::deck::{DeckBlock, DeckPlacement};
use duotris_core::piece::{PieceKind, Rotation};
use duotris_core::protocol::RankedResult;

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            score INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS decks (
            id TEXT PRIMARY KEY,
            user_id TEXT UNIQUE NOT NULL,
            total_score INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tetrimino_placements (
            id TEXT PRIMARY KEY,
            deck_id TEXT NOT NULL,
            tetrimino_type TEXT NOT NULL,
            rotation INTEGER NOT NULL DEFAULT 0,
            positions TEXT NOT NULL,
            score_potential INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (deck_id) REFERENCES decks(id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Contract to persist final scores. Called once per player at session
/// finalization, best-effort.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, user_id: &str, score: i64) -> Result<i64, sqlx::Error>;
}

/// Contract to load a deck's piece placements at player construction.
#[async_trait]
pub trait DeckSource: Send + Sync {
    async fn placements(&self, deck_id: &str) -> Result<Vec<DeckPlacement>, sqlx::Error>;
}

/// sqlx-backed implementation of both persistence contracts.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    async fn record(&self, user_id: &str, score: i64) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO results (user_id, score) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl DeckSource for SqliteStore {
    async fn placements(&self, deck_id: &str) -> Result<Vec<DeckPlacement>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT tetrimino_type, rotation, positions
             FROM tetrimino_placements WHERE deck_id = ?1",
        )
        .bind(deck_id)
        .fetch_all(&self.pool)
        .await?;

        let mut placements = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_raw: String = row.get("tetrimino_type");
            let Ok(kind) = PieceKind::from_str(&kind_raw) else {
                tracing::warn!(deck_id, kind = %kind_raw, "skipping unknown piece kind");
                continue;
            };
            let rotation_raw: i64 = row.get("rotation");
            let rotation = u16::try_from(rotation_raw)
                .ok()
                .and_then(|deg| Rotation::try_from(deg).ok())
                .unwrap_or_default();
            let positions_raw: String = row.get("positions");
            let blocks: Vec<DeckBlock> = match serde_json::from_str(&positions_raw) {
                Ok(blocks) => blocks,
                Err(err) => {
                    tracing::warn!(deck_id, %err, "skipping malformed block list");
                    continue;
                }
            };
            placements.push(DeckPlacement {
                kind,
                rotation,
                blocks,
            });
        }
        Ok(placements)
    }
}

/// Top scores with ranks, best first.
pub async fn top_results(pool: &SqlitePool, limit: i64) -> Result<Vec<RankedResult>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, user_id, score,
                ROW_NUMBER() OVER (ORDER BY score DESC, created_at ASC) AS rank
         FROM results
         ORDER BY score DESC, created_at ASC
         LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RankedResult {
            id: row.get("id"),
            user_id: row.get("user_id"),
            score: row.get("score"),
            rank: row.get("rank"),
        })
        .collect())
}

/// A user's best result with its overall rank, if they have one.
pub async fn user_best(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<RankedResult>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, user_id, score, created_at
         FROM results
         WHERE user_id = ?1
         ORDER BY score DESC, created_at ASC
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let score: i64 = row.get("score");
    let created_at: String = row.get("created_at");
    let rank_row = sqlx::query(
        "SELECT COUNT(*) + 1 AS rank
         FROM results
         WHERE score > ?1 OR (score = ?1 AND created_at < ?2)",
    )
    .bind(score)
    .bind(&created_at)
    .fetch_one(pool)
    .await?;

    Ok(Some(RankedResult {
        id: row.get("id"),
        user_id: row.get("user_id"),
        score,
        rank: rank_row.get("rank"),
    }))
}
