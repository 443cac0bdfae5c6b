use thiserror::Error;

use crate::domain::order::OrderId;
use crate::lifecycle::LifecycleError;
use crate::registry::RegistryError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("base data is locked for order {0}")]
    BaseDataLocked(OrderId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Outcome type of every facade operation. The coordinator never panics;
/// everything a UI consumer can trigger resolves to `Result<_, CoordinatorError>`.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CoordinatorError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote validation rejected {field:?}: {message}")]
    RemoteValidation { field: Option<String>, message: String },
    #[error("order {0} is not in the active set")]
    UnknownOrder(OrderId),
    #[error("fetch for order {0} was superseded by a newer focus change")]
    FetchSuperseded(OrderId),
}

impl From<LifecycleError> for CoordinatorError {
    fn from(value: LifecycleError) -> Self {
        Self::Domain(DomainError::Lifecycle(value))
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(value: RegistryError) -> Self {
        Self::Domain(DomainError::Registry(value))
    }
}

impl CoordinatorError {
    /// Stable, user-presentable summary. Detail stays in the typed error for
    /// the layer that wants it.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Lifecycle(LifecycleError::Validation { .. }))
            | Self::RemoteValidation { .. } => "The request failed validation. Check the form.",
            Self::Domain(_) => "That action is not allowed in the order's current state.",
            Self::Transport(_) => "The order service is unreachable. Please retry shortly.",
            Self::UnknownOrder(_) => "That order is no longer in the active set.",
            Self::FetchSuperseded(_) => "A newer request replaced this one.",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::Lifecycle(LifecycleError::Validation { .. }))
                | Self::RemoteValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::order::{OrderId, OrderStatus};
    use crate::errors::{CoordinatorError, DomainError};
    use crate::lifecycle::LifecycleError;

    #[test]
    fn lifecycle_validation_maps_to_validation_outcome() {
        let error: CoordinatorError = LifecycleError::Validation {
            field: "assigned_worker_id".to_owned(),
            message: "a worker must be assigned".to_owned(),
        }
        .into();

        assert!(error.is_validation());
        assert_eq!(error.user_message(), "The request failed validation. Check the form.");
    }

    #[test]
    fn transition_errors_are_not_validation() {
        let error: CoordinatorError = LifecycleError::InvalidTransition {
            from: OrderStatus::Completed,
            event: "cancel",
        }
        .into();

        assert!(!error.is_validation());
        assert_eq!(
            error.user_message(),
            "That action is not allowed in the order's current state."
        );
    }

    #[test]
    fn transport_errors_carry_retry_guidance() {
        let error = CoordinatorError::Transport("connection refused".to_owned());
        assert_eq!(error.user_message(), "The order service is unreachable. Please retry shortly.");
        let _ = CoordinatorError::Domain(DomainError::BaseDataLocked(OrderId::persisted("5")));
    }
}
