//! Order Transcoder
//!
//! Side-effect-free mapping between the remote order representation and the
//! local editable `OrderRecord`, plus the reverse mapping used for create and
//! update payloads. Malformed remote records are skipped with a warning so a
//! single bad record can never abort loading the rest of the active set.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::order::{OrderId, OrderRecord, OrderStatus};
use crate::domain::step::{Step, StepStatus};
use crate::lifecycle::derive_active_step_index;

/// Order as the remote persistence service ships it. Every field except the
/// primary id is tolerated as absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_sheet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_weight: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_weight: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_quantity: Option<Decimal>,
    #[serde(default)]
    pub steps: Vec<RemoteStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStep {
    pub id: Option<i64>,
    pub process_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
}

/// Payload shape for create and update calls. Server-owned fields (id, order
/// number, timestamps) are not part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_sheet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_weight: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_weight: Option<Decimal>,
    pub observations: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_quantity: Option<Decimal>,
    pub steps: Vec<StepPayload>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub process_order: u32,
    pub process_name: String,
    pub process_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub observations: String,
}

/// Map a remote order into the local editable shape. Returns `None` when the
/// record lacks a primary identifier.
pub fn from_remote(remote: &RemoteOrder) -> Option<OrderRecord> {
    let Some(id) = remote.id else {
        tracing::warn!(
            order_number = remote.order_number.as_deref().unwrap_or("unknown"),
            "skipping remote order without a primary identifier"
        );
        return None;
    };

    let status = match remote.status.as_deref() {
        Some(raw) => OrderStatus::parse(raw),
        None => {
            tracing::warn!(order_id = id, "remote order has no status, defaulting to PENDING");
            OrderStatus::Pending
        }
    };
    if !status.is_recognized() {
        tracing::warn!(order_id = id, status = status.wire_value(), "unrecognized order status");
    }

    let mut steps: Vec<Step> = remote
        .steps
        .iter()
        .filter_map(|remote_step| step_from_remote(id, remote_step))
        .collect();
    // sort_by_key is stable, so ties keep the backend's relative order.
    steps.sort_by_key(|step| step.process_order);
    if steps.windows(2).any(|pair| pair[0].process_order == pair[1].process_order) {
        tracing::warn!(order_id = id, "remote order has duplicate process_order values");
    }

    let active_step_index = derive_active_step_index(&status, &steps);
    let base_data_validated = status.base_data_locked();

    Some(OrderRecord {
        id: OrderId::persisted(id.to_string()),
        is_new_for_form: false,
        order_number: remote.order_number.clone().unwrap_or_else(|| id.to_string()),
        product_name: remote.product_name.clone().unwrap_or_default(),
        base: crate::domain::order::BaseForm {
            product_id: remote.product_id.clone(),
            spec_sheet_id: remote.spec_sheet_id.clone(),
            target_quantity: remote.target_quantity,
            start_date: remote.start_date,
            due_date: remote.due_date,
            registrant_id: remote.registrant_id.clone(),
            provider_id: remote.provider_id.clone(),
            input_weight: remote.input_weight,
            expected_weight: remote.expected_weight,
            observations: remote.observations.clone().unwrap_or_default(),
        },
        steps,
        active_step_index,
        status,
        base_data_validated,
        cancellation_reason: remote.cancellation_reason.clone(),
        produced_quantity: remote.produced_quantity,
        form_errors: BTreeMap::new(),
        created_at: remote.created_at,
        updated_at: remote.updated_at,
    })
}

fn step_from_remote(order_id: i64, remote: &RemoteStep) -> Option<Step> {
    let (Some(id), Some(process_order)) = (remote.id, remote.process_order) else {
        tracing::warn!(order_id, "skipping remote step without id or process_order");
        return None;
    };

    // Step status is derived from timestamp presence, so it stays consistent
    // with the timestamps regardless of what the backend sent.
    let status = StepStatus::from_timestamps(remote.started_at, remote.finished_at);

    Some(Step {
        id: id.to_string(),
        process_order,
        process_name: remote.process_name.clone().unwrap_or_default(),
        process_description: remote.process_description.clone().unwrap_or_default(),
        assigned_worker_id: remote.assigned_worker_id.clone(),
        started_at: remote.started_at,
        finished_at: remote.finished_at,
        status,
        observations: remote.observations.clone().unwrap_or_default(),
    })
}

/// Build the create/update payload for a record. Pure; the inverse of
/// `from_remote` for every field the server accepts back.
pub fn to_remote_payload(record: &OrderRecord) -> OrderPayload {
    OrderPayload {
        status: record.status.wire_value().to_owned(),
        product_id: record.base.product_id.clone(),
        spec_sheet_id: record.base.spec_sheet_id.clone(),
        target_quantity: record.base.target_quantity,
        start_date: record.base.start_date,
        due_date: record.base.due_date,
        registrant_id: record.base.registrant_id.clone(),
        provider_id: record.base.provider_id.clone(),
        input_weight: record.base.input_weight,
        expected_weight: record.base.expected_weight,
        observations: record.base.observations.clone(),
        cancellation_reason: record.cancellation_reason.clone(),
        produced_quantity: record.produced_quantity,
        steps: record
            .steps
            .iter()
            .map(|step| StepPayload {
                id: step.id.parse().ok(),
                process_order: step.process_order,
                process_name: step.process_name.clone(),
                process_description: step.process_description.clone(),
                assigned_worker_id: step.assigned_worker_id.clone(),
                started_at: step.started_at,
                finished_at: step.finished_at,
                observations: step.observations.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::order::{OrderId, OrderStatus};
    use crate::domain::step::StepStatus;
    use crate::transcode::{from_remote, to_remote_payload, RemoteOrder, RemoteStep};

    fn remote_step(id: i64, process_order: u32, completed: bool) -> RemoteStep {
        let now = Utc::now();
        RemoteStep {
            id: Some(id),
            process_order: Some(process_order),
            process_name: Some(format!("Process {process_order}")),
            process_description: None,
            assigned_worker_id: Some("worker-9".to_owned()),
            started_at: completed.then_some(now),
            finished_at: completed.then_some(now),
            observations: None,
        }
    }

    fn remote_order(id: i64, status: &str) -> RemoteOrder {
        RemoteOrder {
            id: Some(id),
            order_number: Some(format!("OP-{id}")),
            status: Some(status.to_owned()),
            product_id: Some("prod-3".to_owned()),
            product_name: Some("Steel bracket".to_owned()),
            target_quantity: Some(Decimal::new(250, 0)),
            ..RemoteOrder::default()
        }
    }

    #[test]
    fn record_without_id_is_rejected_not_crashed() {
        let remote = RemoteOrder { id: None, ..remote_order(1, "PENDING") };
        assert!(from_remote(&remote).is_none());
    }

    #[test]
    fn in_progress_order_gets_first_open_step_as_active() {
        let mut remote = remote_order(10, "IN_PROGRESS");
        remote.steps = vec![
            remote_step(1, 1, true),
            remote_step(2, 2, true),
            remote_step(3, 3, false),
        ];

        let record = from_remote(&remote).expect("well-formed order");
        assert_eq!(record.active_step_index, Some(2));
        assert_eq!(record.steps[2].status, StepStatus::Pending);
        assert_eq!(record.id, OrderId::persisted("10"));
        assert!(!record.is_new_for_form);
        assert!(record.base_data_validated);
    }

    #[test]
    fn steps_are_sorted_by_process_order_not_array_position() {
        let mut remote = remote_order(11, "SETUP");
        remote.steps = vec![
            remote_step(31, 3, false),
            remote_step(11, 1, false),
            remote_step(21, 2, false),
        ];

        let record = from_remote(&remote).expect("well-formed order");
        let orders: Vec<u32> = record.steps.iter().map(|step| step.process_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(record.active_step_index, None);
    }

    #[test]
    fn duplicate_process_order_keeps_original_relative_order() {
        let mut remote = remote_order(12, "IN_PROGRESS");
        remote.steps = vec![
            RemoteStep { process_name: Some("first of pair".to_owned()), ..remote_step(1, 2, false) },
            RemoteStep { process_name: Some("second of pair".to_owned()), ..remote_step(2, 2, false) },
            remote_step(3, 1, true),
        ];

        let record = from_remote(&remote).expect("well-formed order");
        assert_eq!(record.steps[1].process_name, "first of pair");
        assert_eq!(record.steps[2].process_name, "second of pair");
    }

    #[test]
    fn unknown_status_is_preserved_verbatim() {
        let record = from_remote(&remote_order(13, "Quarantined")).expect("well-formed order");
        assert_eq!(record.status, OrderStatus::Unrecognized("Quarantined".to_owned()));
        assert_eq!(record.status_display(), "Quarantined");
        assert_eq!(to_remote_payload(&record).status, "Quarantined");
    }

    #[test]
    fn malformed_step_is_skipped_without_aborting_the_order() {
        let mut remote = remote_order(14, "SETUP");
        remote.steps =
            vec![remote_step(1, 1, false), RemoteStep::default(), remote_step(2, 2, false)];

        let record = from_remote(&remote).expect("order itself is fine");
        assert_eq!(record.steps.len(), 2);
    }

    #[test]
    fn all_steps_completed_points_at_last_step() {
        let mut remote = remote_order(15, "ALL_STEPS_COMPLETED");
        remote.steps = vec![remote_step(1, 1, true), remote_step(2, 2, true)];

        let record = from_remote(&remote).expect("well-formed order");
        assert_eq!(record.active_step_index, Some(1));
    }

    #[test]
    fn payload_round_trip_preserves_server_accepted_fields() {
        let mut remote = remote_order(16, "IN_PROGRESS");
        remote.input_weight = Some(Decimal::new(1255, 2));
        remote.observations = Some("rush order".to_owned());
        remote.steps = vec![remote_step(7, 1, true), remote_step(8, 2, false)];

        let record = from_remote(&remote).expect("well-formed order");
        let payload = to_remote_payload(&record);

        assert_eq!(payload.status, "IN_PROGRESS");
        assert_eq!(payload.product_id, remote.product_id);
        assert_eq!(payload.target_quantity, remote.target_quantity);
        assert_eq!(payload.input_weight, remote.input_weight);
        assert_eq!(payload.observations, "rush order");
        assert_eq!(payload.steps.len(), 2);
        assert_eq!(payload.steps[0].id, Some(7));
        assert_eq!(payload.steps[0].assigned_worker_id.as_deref(), Some("worker-9"));
        assert_eq!(payload.steps[1].started_at, None);
    }
}
