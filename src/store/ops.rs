//! Mutations and path listing
//!
//! FTS operations (DELETE then INSERT per row) are not batched: FTS5 has no
//! INSERT OR REPLACE, and everything runs inside one transaction so disk I/O
//! is already batched.

use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::Sqlite;

use super::rows::{dense_to_bytes, FragmentRow, StoreError};
use super::Store;

impl Store {
    /// Atomic append of fragment rows (single transaction).
    pub fn insert_batch(&self, rows: &[FragmentRow]) -> Result<usize, StoreError> {
        for row in rows {
            row.validate()?;
        }
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            insert_rows(&mut tx, rows).await?;
            tx.commit().await?;
            Ok(())
        })?;
        self.invalidate_vector_index();
        Ok(rows.len())
    }

    /// Remove every row owned by `path`. Returns the number removed.
    pub fn delete_by_path(&self, path: &str) -> Result<u64, StoreError> {
        let deleted = self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            let deleted = delete_path_rows(&mut tx, path).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(deleted)
        })?;
        if deleted > 0 {
            self.invalidate_vector_index();
        }
        Ok(deleted)
    }

    /// Per-file atomic update: delete-then-insert in ONE transaction, so a
    /// concurrent reader sees the old set or the new set, never a union.
    pub fn replace_file(&self, path: &str, rows: &[FragmentRow]) -> Result<usize, StoreError> {
        for row in rows {
            row.validate()?;
        }
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            delete_path_rows(&mut tx, path).await?;
            insert_rows(&mut tx, rows).await?;
            tx.commit().await?;
            Ok(())
        })?;
        self.invalidate_vector_index();
        Ok(rows.len())
    }

    /// One `(path, hash)` per distinct path, sorted by path.
    pub fn list_paths(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT path, MIN(hash) FROM fragments GROUP BY path")
                    .fetch_all(&self.pool)
                    .await?;
            // BTreeMap gives stable path ordering for callers that diff
            let map: BTreeMap<String, String> = rows.into_iter().collect();
            Ok(map.into_iter().collect())
        })
    }

    /// Total fragment rows.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.rt.block_on(async {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fragments")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        })
    }

    /// Rows owned by one path, ordered by start line (tests and doctor).
    pub fn rows_for_path(&self, path: &str) -> Result<Vec<super::StoredFragment>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<SqliteRow> = sqlx::query(
                "SELECT id, path, kind, start_line, end_line, is_anchor, text, context_len
                 FROM fragments WHERE path = ?1 ORDER BY start_line",
            )
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.iter().map(super::row_to_fragment).collect())
        })
    }

    /// Distinct hashes recorded for one path (atomicity checks).
    pub fn hashes_for_path(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT DISTINCT hash FROM fragments WHERE path = ?1")
                    .bind(path)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(h,)| h).collect())
        })
    }
}

async fn insert_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    rows: &[FragmentRow],
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    for row in rows {
        let (late_blob, late_rows, late_cols, late_scale) = match &row.late {
            Some(p) => (
                Some(p.data.clone()),
                Some(p.rows as i64),
                Some(p.cols as i64),
                Some(p.scale as f64),
            ),
            None => (None, None, None, None),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO fragments
             (id, path, hash, kind, start_line, end_line, is_anchor, text, context_len,
              dense, late, late_rows, late_cols, late_scale, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&row.id)
        .bind(&row.path)
        .bind(&row.hash)
        .bind(row.kind.to_string())
        .bind(row.start_line as i64)
        .bind(row.end_line as i64)
        .bind(row.is_anchor as i64)
        .bind(&row.text)
        .bind(row.context_len as i64)
        .bind(dense_to_bytes(&row.dense))
        .bind(late_blob)
        .bind(late_rows)
        .bind(late_cols)
        .bind(late_scale)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        // FTS delete must fail the transaction on error to prevent desync
        sqlx::query("DELETE FROM fragments_fts WHERE id = ?1")
            .bind(&row.id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("INSERT INTO fragments_fts (id, text) VALUES (?1, ?2)")
            .bind(&row.id)
            .bind(super::fts::normalize_for_fts(&row.text))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn delete_path_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    path: &str,
) -> Result<u64, StoreError> {
    sqlx::query("DELETE FROM fragments_fts WHERE id IN (SELECT id FROM fragments WHERE path = ?1)")
        .bind(path)
        .execute(&mut **tx)
        .await?;

    let result = sqlx::query("DELETE FROM fragments WHERE path = ?1")
        .bind(path)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}
