use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradebookError {
    #[error("{0}")]
    BadParams(String),

    #[error("weight must be an integer between 1 and 100")]
    WeightOutOfRange { raw: String },

    #[error("plan total ({new_total}%) would exceed 100%")]
    PlanTotalExceeded { new_total: i64 },

    #[error("plan total is {total}%, grades are locked until it reaches 100%")]
    PlanIncomplete { total: i64 },

    #[error("score must be a number between 0 and 20")]
    InvalidScore { raw: String },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("store insert into {table} failed: {source}")]
    Insert {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store update of {table} failed: {source}")]
    Update {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store delete from {table} failed: {source}")]
    Delete {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GradebookError>;

impl GradebookError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn insert(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Insert { table, source }
    }

    pub fn update(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Update { table, source }
    }

    pub fn delete(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Delete { table, source }
    }

    /// Stable error code carried in the IPC envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) => "bad_params",
            Self::WeightOutOfRange { .. } => "weight_out_of_range",
            Self::PlanTotalExceeded { .. } => "plan_total_exceeded",
            Self::PlanIncomplete { .. } => "plan_incomplete",
            Self::InvalidScore { .. } => "invalid_score",
            Self::NotFound { .. } => "not_found",
            Self::Query(_) => "db_query_failed",
            Self::Insert { .. } => "db_insert_failed",
            Self::Update { .. } => "db_update_failed",
            Self::Delete { .. } => "db_delete_failed",
            Self::Io { .. } => "io_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::WeightOutOfRange { raw } => Some(json!({ "value": raw })),
            Self::PlanTotalExceeded { new_total } => Some(json!({
                "newTotal": new_total,
                "excess": new_total - crate::plan::PLAN_TOTAL
            })),
            Self::PlanIncomplete { total } => Some(json!({
                "total": total,
                "delta": crate::plan::PLAN_TOTAL - total
            })),
            Self::InvalidScore { raw } => Some(json!({ "value": raw })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                Some(json!({ "table": table }))
            }
            Self::Io { path, .. } => Some(json!({ "path": path })),
            Self::BadParams(_) | Self::Query(_) => None,
        }
    }

    /// Store and io failures come from outside this process; everything else
    /// is a rejected input and is recovered locally.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::Query(_)
                | Self::Insert { .. }
                | Self::Update { .. }
                | Self::Delete { .. }
                | Self::Io { .. }
        )
    }
}
