//! Error types for the automation engine.

use beacon_core::error::BeaconError;
use beacon_core::ActionType;

/// Errors from executing a single action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Downstream collaborator unavailable; worth retrying.
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Permanent failure: {0}")]
    Permanent(String),
    #[error("Invalid action config: {0}")]
    InvalidConfig(String),
    #[error("Action type not registered: {0}")]
    UnregisteredHandler(ActionType),
    #[error("Action execution timed out after {0} ms")]
    Timeout(u64),
}

impl ActionError {
    /// Whether the dispatcher may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ActionError::Transient(_) | ActionError::Timeout(_))
    }
}

/// Errors from the engine itself, as opposed to a rule's action.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is shutting down")]
    ShuttingDown,
    #[error("Storage error: {0}")]
    Storage(#[from] BeaconError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::Transient("HTTP 503".to_string());
        assert_eq!(err.to_string(), "Transient failure: HTTP 503");

        let err = ActionError::UnregisteredHandler(ActionType::CreateInvoice);
        assert_eq!(err.to_string(), "Action type not registered: create_invoice");

        let err = ActionError::Timeout(1500);
        assert_eq!(err.to_string(), "Action execution timed out after 1500 ms");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ActionError::Transient("reset".to_string()).is_transient());
        assert!(ActionError::Timeout(10).is_transient());
        assert!(!ActionError::Permanent("HTTP 404".to_string()).is_transient());
        assert!(!ActionError::InvalidConfig("title".to_string()).is_transient());
        assert!(!ActionError::UnregisteredHandler(ActionType::Webhook).is_transient());
    }

    #[test]
    fn test_engine_error_from_beacon_error() {
        let err: EngineError = BeaconError::Storage("disk full".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(EngineError::ShuttingDown.to_string(), "Engine is shutting down");
    }
}
