//! Vector index backed by Postgres + pgvector
//!
//! Chunks live in one table with a `vector` column and a JSONB metadata
//! column. Each predicate clause becomes a JSONB containment test, so a
//! conjunction over the same key twice behaves like the in-memory backend.

use super::{IndexedChunk, Predicate, SearchHit, VectorIndex};
use crate::context::{Metadata, Scalar};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, Statement, TransactionTrait};
use tracing::{debug, info};

/// pgvector-backed index
pub struct PgVectorIndex {
    pool: DbPool,
    table: String,
    dimension: usize,
}

impl PgVectorIndex {
    /// Create a new index over `table`. The name is interpolated into SQL, so
    /// only ASCII letters, digits and underscores are accepted.
    pub fn new(pool: DbPool, table: &str, dimension: usize) -> Result<Self> {
        let valid = !table.is_empty()
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AppError::Configuration {
                message: format!("Invalid index table name: {:?}", table),
            });
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            dimension,
        })
    }

    /// Create the extension, table and indexes if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        let conn = self.pool.connection();
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    document TEXT NOT NULL,
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    embedding vector({dim}) NOT NULL
                )",
                table = self.table,
                dim = self.dimension
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_embedding_idx ON {table} \
                 USING hnsw (embedding vector_cosine_ops)",
                table = self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_metadata_idx ON {table} USING gin (metadata)",
                table = self.table
            ),
        ];

        for sql in statements {
            conn.execute_unprepared(&sql).await.map_err(|e| AppError::VectorIndexError {
                message: format!("Schema setup failed: {}", e),
            })?;
        }

        info!(table = %self.table, dimension = self.dimension, "pgvector schema ready");
        Ok(())
    }

    /// Build the search statement for an optional predicate
    fn search_statement(
        &self,
        query: &[f32],
        predicate: Option<&Predicate>,
        limit: usize,
    ) -> Statement {
        let mut values: Vec<sea_orm::Value> = vec![vector_literal(query).into()];
        let mut conditions = Vec::new();

        for clause in predicate.map(|p| p.clauses()).unwrap_or_default() {
            let containment = serde_json::json!({ clause.key.as_str(): clause.value.to_json() });
            values.push(containment.to_string().into());
            conditions.push(format!("metadata @> ${}::jsonb", values.len()));
        }

        values.push((limit as i64).into());
        let limit_param = values.len();

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            r#"
            SELECT
                id,
                document,
                metadata,
                (1 - (embedding <=> $1::vector))::float8 AS score
            FROM {table}
            {where_clause}
            ORDER BY embedding <=> $1::vector
            LIMIT ${limit_param}
            "#,
            table = self.table,
        );

        Statement::from_sql_and_values(DbBackend::Postgres, &sql, values)
    }
}

/// pgvector text format "[1.0,2.0,...]"
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn metadata_from_json(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| Scalar::from_json(&v).map(|s| (k, s)))
            .collect(),
        _ => Metadata::new(),
    }
}

fn metadata_to_json(metadata: &Metadata) -> serde_json::Value {
    serde_json::Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn search(
        &self,
        query: &[f32],
        predicate: Option<&Predicate>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stmt = self.search_statement(query, predicate, limit);
        let rows = self
            .pool
            .connection()
            .query_all(stmt)
            .await
            .map_err(|e| AppError::VectorIndexError {
                message: format!("Vector search failed: {}", e),
            })?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let read_err = |e: sea_orm::DbErr| AppError::VectorIndexError {
                message: format!("Malformed search row: {}", e),
            };
            hits.push(SearchHit {
                id: row.try_get::<String>("", "id").map_err(read_err)?,
                document: row.try_get::<String>("", "document").map_err(read_err)?,
                metadata: metadata_from_json(
                    row.try_get::<serde_json::Value>("", "metadata").map_err(read_err)?,
                ),
                score: row.try_get::<f64>("", "score").map_err(read_err)? as f32,
            });
        }

        debug!(table = %self.table, hits = hits.len(), "pgvector search");
        Ok(hits)
    }

    async fn upsert(&self, chunks: Vec<IndexedChunk>) -> Result<()> {
        let txn = self.pool.connection().begin().await?;

        let sql = format!(
            r#"
            INSERT INTO {table} (id, document, metadata, embedding)
            VALUES ($1, $2, $3::jsonb, $4::vector)
            ON CONFLICT (id) DO UPDATE SET
                document = EXCLUDED.document,
                metadata = EXCLUDED.metadata,
                embedding = EXCLUDED.embedding
            "#,
            table = self.table
        );

        for chunk in &chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(AppError::Validation {
                    message: format!(
                        "Chunk {} has dimension {}, index expects {}",
                        chunk.id,
                        chunk.embedding.len(),
                        self.dimension
                    ),
                    field: Some("embedding".to_string()),
                });
            }

            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![
                    chunk.id.clone().into(),
                    chunk.document.clone().into(),
                    metadata_to_json(&chunk.metadata).to_string().into(),
                    vector_literal(&chunk.embedding).into(),
                ],
            );
            txn.execute(stmt).await.map_err(|e| AppError::VectorIndexError {
                message: format!("Upsert of chunk {} failed: {}", chunk.id, e),
            })?;
        }

        txn.commit().await?;
        info!(table = %self.table, chunks = chunks.len(), "Chunks upserted");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            format!("SELECT COUNT(*)::bigint AS n FROM {}", self.table),
        );
        let row = self
            .pool
            .connection()
            .query_one(stmt)
            .await
            .map_err(|e| AppError::VectorIndexError {
                message: format!("Count failed: {}", e),
            })?;

        let n = match row {
            Some(row) => row.try_get::<i64>("", "n")?,
            None => 0,
        };
        Ok(n.max(0) as usize)
    }

    fn backend(&self) -> &str {
        "pgvector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_metadata_json_drops_non_scalars() {
        let meta = metadata_from_json(serde_json::json!({
            "intent": "hr",
            "chunk_index": 3,
            "tags": ["a", "b"],
            "missing": null
        }));
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["intent"], Scalar::from("hr"));
        assert_eq!(meta["chunk_index"], Scalar::Integer(3));

        assert!(metadata_from_json(serde_json::json!("not an object")).is_empty());
    }

    #[test]
    fn test_metadata_json_round_trip_shape() {
        let mut meta = Metadata::new();
        meta.insert("severity".into(), Scalar::Integer(2));
        meta.insert("department".into(), Scalar::from("Engineering"));
        let json = metadata_to_json(&meta);
        assert_eq!(json["severity"], serde_json::json!(2));
        assert_eq!(json["department"], serde_json::json!("Engineering"));
    }
}
