//! Append-only step output records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ResultId, RunId};

/// An immutable, typed output produced by a step, scoped to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: ResultId,
    pub run_id: RunId,
    pub result_type: String,
    pub version: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Case-insensitive match on type and, when given, version.
    pub fn matches(&self, result_type: &str, version: Option<&str>) -> bool {
        self.result_type.eq_ignore_ascii_case(result_type)
            && version.is_none_or(|v| self.version.eq_ignore_ascii_case(v))
    }
}
