use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{ObjectId, PortfolioSummary};
use crate::store::document::{apply_update, summary_from_document};
use crate::store::traits::{Document, PortfolioStore, UpdateOp, UpdateResult};

/// Portfolio aggregates kept as JSONB documents, one row per portfolio.
///
/// Updates lock the row, apply the op in process and write the document back
/// inside one transaction, which gives each call single-document atomicity.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the portfolios table if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                document JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create portfolios table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS portfolios_created_at_idx ON portfolios (created_at)")
            .execute(&self.pool)
            .await
            .context("Failed to create portfolios index")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl PortfolioStore for PostgresStore {
    async fn insert_portfolio(&self, id: &ObjectId, document: Document) -> Result<()> {
        sqlx::query("INSERT INTO portfolios (id, document) VALUES ($1, $2)")
            .bind(id.to_hex())
            .bind(document)
            .execute(&self.pool)
            .await
            .context("Failed to insert portfolio")?;

        Ok(())
    }

    async fn find_portfolio(&self, id: &ObjectId) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT document FROM portfolios WHERE id = $1")
            .bind(id.to_hex())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch portfolio")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let document: Document = row
            .try_get("document")
            .context("Failed to read portfolio document")?;
        Ok(Some(document))
    }

    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT jsonb_build_object(
                '_id', document->'_id',
                'title', document->'title',
                'description', document->'description',
                'created_at', document->'created_at'
            ) AS summary
            FROM portfolios
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list portfolios")?;

        rows.into_iter()
            .map(|row| {
                let summary: Document = row
                    .try_get("summary")
                    .context("Failed to read portfolio summary")?;
                summary_from_document(summary)
            })
            .collect()
    }

    async fn update_portfolio(&self, id: &ObjectId, op: UpdateOp) -> Result<UpdateResult> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin portfolio update")?;

        let row = sqlx::query("SELECT document FROM portfolios WHERE id = $1 FOR UPDATE")
            .bind(id.to_hex())
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock portfolio")?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(UpdateResult::unmatched());
        };

        let mut document: Document = row
            .try_get("document")
            .context("Failed to read portfolio document")?;
        let modified = apply_update(&mut document, &op)?;

        if modified {
            sqlx::query("UPDATE portfolios SET document = $2 WHERE id = $1")
                .bind(id.to_hex())
                .bind(document)
                .execute(&mut *tx)
                .await
                .context("Failed to write portfolio document")?;
        }

        tx.commit()
            .await
            .context("Failed to commit portfolio update")?;

        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    async fn delete_portfolio(&self, id: &ObjectId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM portfolios WHERE id = $1")
            .bind(id.to_hex())
            .execute(&self.pool)
            .await
            .context("Failed to delete portfolio")?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
