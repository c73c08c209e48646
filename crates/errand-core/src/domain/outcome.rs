//! Outcome model: what the host capabilities hand back to the core.
//!
//! Both shapes are plain data; neither the executor nor the backend can
//! fault the core, they can only report failure.

use serde::{Deserialize, Serialize};

use super::errors::ErrandError;

/// Result of one executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ExecutorOutcome {
    Success { payload: String },
    Failure { error: String },
}

impl ExecutorOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        ExecutorOutcome::Success {
            payload: payload.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ExecutorOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutorOutcome::Success { .. })
    }

    /// The text recorded as the result payload (output on success, error description on failure).
    pub fn into_payload(self) -> String {
        match self {
            ExecutorOutcome::Success { payload } => payload,
            ExecutorOutcome::Failure { error } => error,
        }
    }
}

/// Discriminated outcome of one backend CRUD call.
///
/// Serialized as `{"status":"success","data":..}` / `{"status":"failure","reason":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome<T> {
    Success { data: T },
    Failure { reason: String },
}

impl<T> SyncOutcome<T> {
    pub fn success(data: T) -> Self {
        SyncOutcome::Success { data }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        SyncOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }

    /// Convert into the core's error type, tagging failures with the CRUD verb.
    pub fn into_result(self, operation: &'static str) -> Result<T, ErrandError> {
        match self {
            SyncOutcome::Success { data } => Ok(data),
            SyncOutcome::Failure { reason } => Err(ErrandError::persistence(operation, reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_outcome_uses_status_tag() {
        let ok: SyncOutcome<()> = SyncOutcome::success(());
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["status"], "success");

        let bad: SyncOutcome<()> = SyncOutcome::failure("locked");
        let v = serde_json::to_value(&bad).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["reason"], "locked");
    }

    #[test]
    fn failure_becomes_persistence_error() {
        let bad: SyncOutcome<u32> = SyncOutcome::failure("locked");
        let err = bad.into_result("delete").unwrap_err();
        assert_eq!(
            err,
            ErrandError::Persistence {
                operation: "delete",
                reason: "locked".to_string()
            }
        );
    }

    #[test]
    fn executor_failure_payload_is_the_error_text() {
        let o = ExecutorOutcome::failure("navigation timeout");
        assert!(!o.is_success());
        assert_eq!(o.into_payload(), "navigation timeout");
    }
}
