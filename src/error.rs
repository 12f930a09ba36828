// Error taxonomy and HTTP mapping.
//
// Every store failure is normalized into `AppError` at the db adapter
// boundary; nothing above the adapter inspects vendor error shapes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Input rejected before any store operation was attempted.
    #[error("{0}")]
    Validation(String),

    /// A foreign key named a record that does not exist.
    #[error("{0}")]
    Reference(String),

    /// The requested record does not exist (or is not owned by the caller).
    #[error("{0}")]
    NotFound(String),

    /// The operation would orphan dependent records.
    #[error("{0}")]
    Conflict(String),

    /// The store is missing a table or column the application expects.
    /// Surfaced to the client as a setup prompt with a manual retry.
    #[error("table '{table}' is missing from the store")]
    SchemaMissing { table: String },

    /// Any other store failure. Details are logged, never sent to clients.
    #[error("store error on '{table}': {source}")]
    Store {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

impl AppError {
    /// Normalize a raw store failure for `table` into the taxonomy.
    pub fn store(table: &str, source: sqlx::Error) -> Self {
        if is_schema_missing(&source) {
            AppError::SchemaMissing {
                table: table.to_string(),
            }
        } else {
            AppError::Store {
                table: table.to_string(),
                source,
            }
        }
    }
}

/// Detect "the table/column is not there" as opposed to any other failure.
///
/// Postgres reports undefined tables/columns as SQLSTATE 42P01/42703 with
/// "... does not exist" in the message; PostgREST schema-cache misses say
/// "Could not find the ..."; SQLite says "no such table".
fn is_schema_missing(e: &sqlx::Error) -> bool {
    let Some(db_err) = e.as_database_error() else {
        return false;
    };
    if matches!(db_err.code().as_deref(), Some("42P01") | Some("42703")) {
        return true;
    }
    let msg = db_err.message();
    msg.contains("does not exist")
        || msg.contains("Could not find the")
        || msg.contains("no such table")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Reference(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": msg })),
            )
                .into_response(),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response()
            }
            AppError::SchemaMissing { table } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": format!("table '{table}' is missing from the store"),
                    "setup_required": true,
                    "table": table,
                })),
            )
                .into_response(),
            AppError::Store { table, source } => {
                tracing::error!("Store error on '{table}': {source}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn bare_pool() -> sqlx::SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_table_classified_as_schema_missing() {
        let pool = bare_pool().await;
        // No migrations ran, so this table cannot exist.
        let err = sqlx::query("SELECT * FROM animas")
            .fetch_all(&pool)
            .await
            .err()
            .unwrap();

        assert!(is_schema_missing(&err));
        match AppError::store("animas", err) {
            AppError::SchemaMissing { table } => assert_eq!(table, "animas"),
            other => panic!("expected SchemaMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_store_errors_stay_generic() {
        let pool = bare_pool().await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        // NOT NULL violation is a plain store error, not a schema gap.
        let err = sqlx::query("INSERT INTO t (v) VALUES (NULL)")
            .execute(&pool)
            .await
            .unwrap_err();

        assert!(!is_schema_missing(&err));
        match AppError::store("t", err) {
            AppError::Store { table, .. } => assert_eq!(table, "t"),
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn test_row_not_found_is_not_schema_missing() {
        assert!(!is_schema_missing(&sqlx::Error::RowNotFound));
    }
}
