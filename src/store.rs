use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use tokio::sync::RwLock;

use crate::error::{Result, ReviewError};
use crate::indexer::Table;
use crate::models::{FieldSelector, ReviewRecord, RATING_COLUMN};

pub const TABLE_NAME: &str = "reviews";

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub rows_loaded: usize,
    pub rows_skipped: usize,
    pub columns: Vec<String>,
    pub fingerprint: String,
    pub generation: u64,
}

/// Relational copy of the review dataset. Every column is TEXT; the table is
/// dropped and recreated on each import.
pub struct RecordStore {
    pool: SqlitePool,
    columns: RwLock<Vec<String>>,
    fingerprint: RwLock<String>,
    generation: AtomicU64,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl RecordStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        // Every connection to `sqlite::memory:` opens a separate database,
        // so in-memory stores keep a single connection alive.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = options.connect(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            columns: RwLock::new(Vec::new()),
            fingerprint: RwLock::new(String::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Incremented by every successful import.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fingerprint of the last imported dataset; empty before the first import.
    pub async fn fingerprint(&self) -> String {
        self.fingerprint.read().await.clone()
    }

    pub async fn columns(&self) -> Vec<String> {
        self.columns.read().await.clone()
    }

    /// Replaces the whole table with `table`. Rows whose rating does not
    /// parse as an integer are skipped.
    pub async fn import(&self, table: &Table) -> Result<ImportReport> {
        let rating_idx = table
            .headers
            .iter()
            .position(|h| h == RATING_COLUMN)
            .ok_or_else(|| {
                ReviewError::Validation(format!("coluna obrigatória ausente: {}", RATING_COLUMN))
            })?;

        let mut columns = self.columns.write().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", TABLE_NAME))
            .execute(&mut *tx)
            .await?;

        let column_defs: Vec<String> = table
            .headers
            .iter()
            .map(|h| format!("{} TEXT", quote_ident(h)))
            .collect();
        sqlx::query(&format!(
            "CREATE TABLE {} ({})",
            TABLE_NAME,
            column_defs.join(", ")
        ))
        .execute(&mut *tx)
        .await?;

        let column_list: Vec<String> = table.headers.iter().map(|h| quote_ident(h)).collect();
        let placeholders = vec!["?"; table.headers.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            TABLE_NAME,
            column_list.join(", "),
            placeholders
        );

        let mut rows_loaded = 0usize;
        let mut rows_skipped = 0usize;

        for (line, row) in table.rows.iter().enumerate() {
            let rating = row.get(rating_idx).and_then(|v| v.as_deref());
            if crate::models::parse_rating(rating).is_err() {
                tracing::warn!("Skipping row {}: overall_rating {:?} is not an integer", line + 2, rating);
                rows_skipped += 1;
                continue;
            }

            let mut query = sqlx::query(&insert_sql);
            for value in row {
                query = query.bind(value.clone());
            }
            query.execute(&mut *tx).await?;
            rows_loaded += 1;
        }

        tx.commit().await?;

        *columns = table.headers.clone();
        *self.fingerprint.write().await = table.fingerprint.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            "Imported {} reviews ({} skipped), dataset {}",
            rows_loaded,
            rows_skipped,
            table.fingerprint
        );

        Ok(ImportReport {
            rows_loaded,
            rows_skipped,
            columns: table.headers.clone(),
            fingerprint: table.fingerprint.clone(),
            generation,
        })
    }

    pub async fn count(&self) -> Result<i64> {
        if self.columns.read().await.is_empty() {
            return Ok(0);
        }
        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", TABLE_NAME))
            .fetch_one(&self.pool)
            .await?;
        Ok(total.0)
    }

    async fn has_column(&self, column: &str) -> bool {
        self.columns.read().await.iter().any(|c| c == column)
    }

    /// Distinct non-null values of `field`, in order of first appearance.
    pub async fn distinct_values(&self, field: FieldSelector) -> Result<Vec<String>> {
        if !self.has_column(field.column()).await {
            return Ok(Vec::new());
        }
        let col = quote_ident(field.column());
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {col} IS NOT NULL AND TRIM({col}) <> '' \
             GROUP BY {col} ORDER BY MIN(rowid)",
            col = col,
            table = TABLE_NAME
        );
        let values: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(values.into_iter().map(|(v,)| v).collect())
    }

    /// One record per distinct value of `field`: the first row carrying it.
    pub async fn representatives(&self, field: FieldSelector) -> Result<Vec<ReviewRecord>> {
        if !self.has_column(field.column()).await {
            return Ok(Vec::new());
        }
        let col = quote_ident(field.column());
        let sql = format!(
            "SELECT * FROM {table} WHERE rowid IN ( \
                SELECT MIN(rowid) FROM {table} \
                WHERE {col} IS NOT NULL AND TRIM({col}) <> '' GROUP BY {col} \
             ) ORDER BY rowid",
            col = col,
            table = TABLE_NAME
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ReviewRecord> {
    let mut pairs = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value: Option<String> = row.try_get(idx)?;
        pairs.push((column.name().to_string(), value));
    }
    ReviewRecord::from_columns(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let headers = ["product_id", "product_name", "product_brand", "site_category_lv1", "site_category_lv2", "overall_rating", "review_text"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let row = |cells: [&str; 7]| {
            cells
                .iter()
                .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
                .collect::<Vec<_>>()
        };
        Table {
            headers,
            rows: vec![
                row(["1", "Produto A", "X", "Eletrônicos", "Fones", "5", "ótimo"]),
                row(["1", "Produto A", "X", "Eletrônicos", "Fones", "4", "bom"]),
                row(["2", "Produto B", "Y", "Casa", "Cozinha", "2", "ruim"]),
                row(["1", "Produto A", "X", "Eletrônicos", "Fones", "1", "quebrou"]),
                row(["2", "Produto B", "Y", "Casa", "", "3", "ok"]),
                row(["3", "Produto C", "Z", "Casa", "Sala", "cinco", "inválida"]),
            ],
            fingerprint: "test".to_string(),
        }
    }

    async fn store() -> RecordStore {
        RecordStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn import_skips_unparseable_ratings() {
        let store = store().await;
        let report = store.import(&sample_table()).await.unwrap();
        assert_eq!(report.rows_loaded, 5);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(store.count().await.unwrap(), 5);
        assert_eq!(store.generation(), 1);
        assert_eq!(store.fingerprint().await, "test");
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let store = store().await;
        store.import(&sample_table()).await.unwrap();
        let first = store.distinct_values(FieldSelector::ProductName).await.unwrap();
        store.import(&sample_table()).await.unwrap();
        let second = store.distinct_values(FieldSelector::ProductName).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 5);
        assert_eq!(first, second);
        assert_eq!(first, vec!["Produto A", "Produto B"]);
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn representatives_are_first_rows() {
        let store = store().await;
        store.import(&sample_table()).await.unwrap();
        let reps = store.representatives(FieldSelector::ProductName).await.unwrap();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].review_text.as_deref(), Some("ótimo"));
        assert_eq!(reps[1].product_brand.as_deref(), Some("Y"));

        let subcats = store.distinct_values(FieldSelector::SiteCategoryLv2).await.unwrap();
        assert_eq!(subcats, vec!["Fones", "Cozinha"]);
    }

    #[tokio::test]
    async fn missing_rating_column_is_rejected() {
        let store = store().await;
        let table = Table {
            headers: vec!["product_name".into()],
            rows: vec![vec![Some("A".into())]],
            fingerprint: String::new(),
        };
        assert!(matches!(store.import(&table).await, Err(ReviewError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_store_has_no_values() {
        let store = store().await;
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.representatives(FieldSelector::ProductBrand).await.unwrap().is_empty());
    }
}
