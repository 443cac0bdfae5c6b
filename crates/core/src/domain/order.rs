use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::step::{Step, StepStatus};

/// Identity of an order in the registry. Drafts carry a locally minted token
/// until the first successful create, after which the registry rekeys them to
/// the server-assigned identifier. The two arms are distinct types rather
/// than a string-prefix convention so they can never be confused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OrderId {
    Draft(String),
    Persisted(String),
}

impl OrderId {
    pub fn new_draft() -> Self {
        Self::Draft(Uuid::new_v4().to_string())
    }

    pub fn persisted(id: impl Into<String>) -> Self {
        Self::Persisted(id.into())
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }

    /// Server-side identifier, present only once persisted.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Draft(_) => None,
            Self::Persisted(id) => Some(id),
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft(token) => write!(f, "draft:{token}"),
            Self::Persisted(id) => f.write_str(id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Setup,
    SetupCompleted,
    InProgress,
    Paused,
    AllStepsCompleted,
    Completed,
    Cancelled,
    /// A status string the backend sent that this client does not know.
    /// Preserved verbatim so it survives a save round trip unchanged.
    Unrecognized(String),
}

impl OrderStatus {
    /// Case-insensitive mapping from the remote status string. Unknown values
    /// are passed through verbatim, never dropped.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "SETUP" => Self::Setup,
            "SETUP_COMPLETED" => Self::SetupCompleted,
            "IN_PROGRESS" => Self::InProgress,
            "PAUSED" => Self::Paused,
            "ALL_STEPS_COMPLETED" => Self::AllStepsCompleted,
            "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Unrecognized(raw.to_owned()),
        }
    }

    pub fn wire_value(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Setup => "SETUP",
            Self::SetupCompleted => "SETUP_COMPLETED",
            Self::InProgress => "IN_PROGRESS",
            Self::Paused => "PAUSED",
            Self::AllStepsCompleted => "ALL_STEPS_COMPLETED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn display_label(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Setup => "In setup",
            Self::SetupCompleted => "Setup completed",
            Self::InProgress => "In progress",
            Self::Paused => "Paused",
            Self::AllStepsCompleted => "All steps completed",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Base-data lock is derived from status, never stored, so it cannot
    /// drift. Unrecognized statuses lock the base form.
    pub fn base_data_locked(&self) -> bool {
        !matches!(self, Self::Pending | Self::Setup)
    }
}

/// Editable base fields of an order. Mutable only while the status keeps the
/// base data unlocked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseForm {
    pub product_id: Option<String>,
    pub spec_sheet_id: Option<String>,
    pub target_quantity: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub registrant_id: Option<String>,
    pub provider_id: Option<String>,
    pub input_weight: Option<Decimal>,
    pub expected_weight: Option<Decimal>,
    pub observations: String,
}

/// Data required to finalize an order out of ALL_STEPS_COMPLETED.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalizationData {
    pub produced_quantity: Decimal,
    pub observations: Option<String>,
}

/// Local, editable representation of one production order.
///
/// `order_number` and `product_name` are display snapshots frozen at
/// creation/load time; a later rename of the underlying product must not
/// change them. `form_errors` is local validation state and never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub is_new_for_form: bool,
    pub status: OrderStatus,
    pub order_number: String,
    pub product_name: String,
    pub base: BaseForm,
    pub steps: Vec<Step>,
    /// Derived; recomputed on every mutation, never set directly.
    pub active_step_index: Option<usize>,
    pub base_data_validated: bool,
    pub cancellation_reason: Option<String>,
    pub produced_quantity: Option<Decimal>,
    #[serde(skip)]
    pub form_errors: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    pub fn new_draft() -> Self {
        Self {
            id: OrderId::new_draft(),
            is_new_for_form: true,
            status: OrderStatus::Pending,
            order_number: String::new(),
            product_name: String::new(),
            base: BaseForm::default(),
            steps: Vec::new(),
            active_step_index: None,
            base_data_validated: false,
            cancellation_reason: None,
            produced_quantity: None,
            form_errors: BTreeMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn status_display(&self) -> &str {
        self.status.display_label()
    }

    pub fn base_data_locked(&self) -> bool {
        self.status.base_data_locked()
    }

    /// (completed, total) step counts for progress indicators.
    pub fn step_progress(&self) -> (usize, usize) {
        let completed =
            self.steps.iter().filter(|step| step.status == StepStatus::Completed).count();
        (completed, self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{OrderId, OrderRecord, OrderStatus};

    #[test]
    fn new_draft_starts_pending_and_unlocked() {
        let record = OrderRecord::new_draft();
        assert!(record.id.is_draft());
        assert!(record.is_new_for_form);
        assert_eq!(record.status, OrderStatus::Pending);
        assert!(!record.base_data_locked());
        assert_eq!(record.active_step_index, None);
    }

    #[test]
    fn draft_tokens_are_unique() {
        assert_ne!(OrderId::new_draft(), OrderId::new_draft());
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(OrderStatus::parse("in_progress"), OrderStatus::InProgress);
        assert_eq!(OrderStatus::parse("In_Progress"), OrderStatus::InProgress);
        assert_eq!(OrderStatus::parse("ALL_STEPS_COMPLETED"), OrderStatus::AllStepsCompleted);
    }

    #[test]
    fn unknown_status_round_trips_verbatim() {
        let status = OrderStatus::parse("QUARANTINED");
        assert_eq!(status, OrderStatus::Unrecognized("QUARANTINED".to_owned()));
        assert_eq!(status.wire_value(), "QUARANTINED");
        assert_eq!(status.display_label(), "QUARANTINED");
        assert!(!status.is_recognized());
    }

    #[test]
    fn base_data_lock_follows_status() {
        assert!(!OrderStatus::Pending.base_data_locked());
        assert!(!OrderStatus::Setup.base_data_locked());
        assert!(OrderStatus::SetupCompleted.base_data_locked());
        assert!(OrderStatus::InProgress.base_data_locked());
        assert!(OrderStatus::Cancelled.base_data_locked());
        assert!(OrderStatus::Unrecognized("QUARANTINED".to_owned()).base_data_locked());
    }

    #[test]
    fn persisted_id_exposes_server_id() {
        let id = OrderId::persisted("412");
        assert!(!id.is_draft());
        assert_eq!(id.server_id(), Some("412"));
        assert_eq!(OrderId::new_draft().server_id(), None);
    }
}
