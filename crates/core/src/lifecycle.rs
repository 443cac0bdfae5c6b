//! Order Lifecycle Engine
//!
//! Pure state machine logic for orders and their steps. Every transition is
//! validated synchronously, before any network call is issued, and derived
//! fields (`active_step_index`, `base_data_locked`) are recomputed here on
//! every mutation rather than observed from the outside.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::{FinalizationData, OrderRecord, OrderStatus};
use crate::domain::step::{Step, StepStatus};

/// Order-level events. Step start/complete are separate operations because
/// they act on a step index, not on the order status alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    SaveSetup,
    ValidateSetup,
    StartProduction,
    Pause,
    Resume,
    Cancel { reason: String },
    Finalize { data: FinalizationData },
}

impl OrderEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SaveSetup => "save_setup",
            Self::ValidateSetup => "validate_setup",
            Self::StartProduction => "start_production",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel { .. } => "cancel",
            Self::Finalize { .. } => "finalize",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("invalid transition from {from:?} on event {event}")]
    InvalidTransition { from: OrderStatus, event: &'static str },
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },
    #[error("step {index} does not exist on this order")]
    StepOutOfRange { index: usize },
    #[error("step {index} is not the active step")]
    NotActiveStep { index: usize },
    #[error("step {index} cannot transition from {status:?}")]
    InvalidStepTransition { index: usize, status: StepStatus },
}

impl LifecycleError {
    fn validation(field: &str, message: &str) -> Self {
        Self::Validation { field: field.to_owned(), message: message.to_owned() }
    }
}

/// The step currently eligible for start/complete actions.
///
/// IN_PROGRESS / PAUSED: first non-completed step, or the last step when all
/// are complete. ALL_STEPS_COMPLETED: the last step. Anything else: none.
pub fn derive_active_step_index(status: &OrderStatus, steps: &[Step]) -> Option<usize> {
    match status {
        OrderStatus::InProgress | OrderStatus::Paused => {
            if steps.is_empty() {
                None
            } else {
                Some(
                    steps
                        .iter()
                        .position(|step| step.status != StepStatus::Completed)
                        .unwrap_or(steps.len() - 1),
                )
            }
        }
        OrderStatus::AllStepsCompleted => steps.len().checked_sub(1),
        _ => None,
    }
}

/// Apply an order-level event, validating the transition and recomputing
/// derived fields. The record is untouched when an error is returned.
pub fn apply_event(
    record: &mut OrderRecord,
    event: &OrderEvent,
) -> Result<TransitionOutcome, LifecycleError> {
    let from = record.status.clone();

    let to = match (&from, event) {
        (OrderStatus::Pending, OrderEvent::SaveSetup) => OrderStatus::Setup,
        (OrderStatus::Setup, OrderEvent::ValidateSetup) => {
            if record.base.product_id.is_none() {
                return Err(LifecycleError::validation(
                    "product_id",
                    "a product must be selected before validating the configuration",
                ));
            }
            if record.base.target_quantity.is_none() {
                return Err(LifecycleError::validation(
                    "target_quantity",
                    "a target quantity is required before validating the configuration",
                ));
            }
            OrderStatus::SetupCompleted
        }
        (OrderStatus::SetupCompleted, OrderEvent::StartProduction) => {
            // An order may legitimately have no steps; it then skips straight
            // past execution.
            if record.steps.is_empty() {
                OrderStatus::AllStepsCompleted
            } else {
                OrderStatus::InProgress
            }
        }
        (OrderStatus::InProgress, OrderEvent::Pause) => OrderStatus::Paused,
        (OrderStatus::Paused, OrderEvent::Resume) => OrderStatus::InProgress,
        (
            OrderStatus::Pending
            | OrderStatus::Setup
            | OrderStatus::SetupCompleted
            | OrderStatus::InProgress
            | OrderStatus::Paused,
            OrderEvent::Cancel { reason },
        ) => {
            if reason.trim().is_empty() {
                return Err(LifecycleError::validation(
                    "cancellation_reason",
                    "a cancellation reason is required",
                ));
            }
            record.cancellation_reason = Some(reason.trim().to_owned());
            OrderStatus::Cancelled
        }
        (OrderStatus::AllStepsCompleted, OrderEvent::Finalize { data }) => {
            if data.produced_quantity < Decimal::ZERO {
                return Err(LifecycleError::validation(
                    "produced_quantity",
                    "produced quantity must be zero or greater",
                ));
            }
            record.produced_quantity = Some(data.produced_quantity);
            OrderStatus::Completed
        }
        _ => {
            return Err(LifecycleError::InvalidTransition { from, event: event.label() });
        }
    };

    if matches!(event, OrderEvent::ValidateSetup) {
        record.base_data_validated = true;
    }
    record.status = to.clone();
    record.active_step_index = derive_active_step_index(&record.status, &record.steps);

    Ok(TransitionOutcome { from, to })
}

/// Assign (or clear) the worker for a step. Allowed only while the step is
/// still pending; a running or completed step keeps its worker for audit.
pub fn assign_worker(
    record: &mut OrderRecord,
    index: usize,
    worker_id: Option<String>,
) -> Result<(), LifecycleError> {
    let step = record.steps.get_mut(index).ok_or(LifecycleError::StepOutOfRange { index })?;
    if step.status != StepStatus::Pending {
        return Err(LifecycleError::InvalidStepTransition { index, status: step.status.clone() });
    }
    step.assigned_worker_id = worker_id;
    Ok(())
}

/// Start the step at `index`. Only the active step of an IN_PROGRESS order
/// may start, and it must have a worker assigned.
pub fn start_step(
    record: &mut OrderRecord,
    index: usize,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if record.status != OrderStatus::InProgress {
        return Err(LifecycleError::InvalidTransition {
            from: record.status.clone(),
            event: "start_step",
        });
    }
    if index >= record.steps.len() {
        return Err(LifecycleError::StepOutOfRange { index });
    }
    if record.active_step_index != Some(index) {
        return Err(LifecycleError::NotActiveStep { index });
    }

    let step = &mut record.steps[index];
    if step.status != StepStatus::Pending {
        return Err(LifecycleError::InvalidStepTransition { index, status: step.status.clone() });
    }
    if step.assigned_worker_id.is_none() {
        return Err(LifecycleError::validation(
            "assigned_worker_id",
            "a worker must be assigned before the step can start",
        ));
    }

    step.started_at = Some(now);
    step.status = StepStatus::from_timestamps(step.started_at, step.finished_at);
    Ok(())
}

/// Complete the step at `index`. Completing the last remaining step moves the
/// order to ALL_STEPS_COMPLETED; the returned outcome reports that order
/// transition when it happens.
pub fn complete_step(
    record: &mut OrderRecord,
    index: usize,
    now: DateTime<Utc>,
) -> Result<Option<TransitionOutcome>, LifecycleError> {
    if record.status != OrderStatus::InProgress {
        return Err(LifecycleError::InvalidTransition {
            from: record.status.clone(),
            event: "complete_step",
        });
    }
    if index >= record.steps.len() {
        return Err(LifecycleError::StepOutOfRange { index });
    }
    if record.active_step_index != Some(index) {
        return Err(LifecycleError::NotActiveStep { index });
    }

    let step = &mut record.steps[index];
    if step.status != StepStatus::InProgress {
        return Err(LifecycleError::InvalidStepTransition { index, status: step.status.clone() });
    }

    step.finished_at = Some(now);
    step.status = StepStatus::from_timestamps(step.started_at, step.finished_at);

    let all_done = record.steps.iter().all(|step| step.status == StepStatus::Completed);
    let outcome = if all_done {
        let from = record.status.clone();
        record.status = OrderStatus::AllStepsCompleted;
        Some(TransitionOutcome { from, to: OrderStatus::AllStepsCompleted })
    } else {
        None
    };
    record.active_step_index = derive_active_step_index(&record.status, &record.steps);

    Ok(outcome)
}
