//! Active Production Orders Coordinator
//!
//! The facade UI consumers talk to. It owns the registry, the focus pointer,
//! and the per-order in-flight bookkeeping. All state lives behind one mutex
//! that is only ever held across synchronous sections, never across an await;
//! that is what makes `rekey` indivisible and keeps a slow fetch for one
//! order from blocking interaction with another.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use prodflow_core::domain::order::{FinalizationData, OrderId, OrderRecord};
use prodflow_core::domain::step::{Step, StepStatus};
use prodflow_core::errors::{CoordinatorError, DomainError};
use prodflow_core::lifecycle::{self, OrderEvent, TransitionOutcome};
use prodflow_core::registry::OrderRegistry;
use prodflow_core::transcode::{from_remote, to_remote_payload, RemoteOrder};
use prodflow_remote::{ActiveFilter, RemoteOrderService, ServiceError, StatusChangeMeta};

use crate::location::{format_location, parse_location, LocationAction, LocationProvider};

/// One editable base-form field. Typed so callers cannot invent field names
/// and validation failures can point at the exact field.
#[derive(Clone, Debug, PartialEq)]
pub enum BaseFieldPatch {
    Product(Option<String>),
    SpecSheet(Option<String>),
    TargetQuantity(Option<Decimal>),
    StartDate(Option<NaiveDate>),
    DueDate(Option<NaiveDate>),
    Registrant(Option<String>),
    Provider(Option<String>),
    InputWeight(Option<Decimal>),
    ExpectedWeight(Option<Decimal>),
    Observations(String),
}

impl BaseFieldPatch {
    fn field_name(&self) -> &'static str {
        match self {
            Self::Product(_) => "product_id",
            Self::SpecSheet(_) => "spec_sheet_id",
            Self::TargetQuantity(_) => "target_quantity",
            Self::StartDate(_) => "start_date",
            Self::DueDate(_) => "due_date",
            Self::Registrant(_) => "registrant_id",
            Self::Provider(_) => "provider_id",
            Self::InputWeight(_) => "input_weight",
            Self::ExpectedWeight(_) => "expected_weight",
            Self::Observations(_) => "observations",
        }
    }

    fn validate(&self) -> Option<&'static str> {
        match self {
            Self::TargetQuantity(Some(value)) if *value < Decimal::ZERO => {
                Some("target quantity must be zero or greater")
            }
            Self::InputWeight(Some(value)) | Self::ExpectedWeight(Some(value))
                if *value < Decimal::ZERO =>
            {
                Some("weights must be zero or greater")
            }
            _ => None,
        }
    }
}

/// Step definition taken from the selected specification sheet when an order
/// is configured. Name and description become snapshots on the step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepDraft {
    pub process_order: u32,
    pub process_name: String,
    pub process_description: String,
}

/// Read-only row for the list/sidebar consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderSummary {
    pub id: OrderId,
    pub order_number: String,
    pub product_name: String,
    pub status_label: String,
    pub steps_completed: usize,
    pub steps_total: usize,
}

struct CoordinatorState {
    registry: OrderRegistry,
    focused: Option<OrderId>,
    /// Bumped on every focus-affecting action; a resolving fetch compares its
    /// captured value and discards itself when superseded.
    focus_epoch: u64,
    /// Server ids with a fetch currently outstanding.
    loading: HashSet<String>,
}

/// Constructed once per session and handed to every UI consumer; nothing else
/// ever mutates the registry.
pub struct Coordinator {
    service: Arc<dyn RemoteOrderService>,
    location: Arc<dyn LocationProvider>,
    base_path: String,
    state: Mutex<CoordinatorState>,
}

enum FocusPlan {
    Done,
    Announce(LocationAction),
    Fetch { server_id: String, epoch: u64 },
}

impl Coordinator {
    pub fn new(
        base_path: impl Into<String>,
        service: Arc<dyn RemoteOrderService>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            service,
            location,
            base_path: base_path.into(),
            state: Mutex::new(CoordinatorState {
                registry: OrderRegistry::new(),
                focused: None,
                focus_epoch: 0,
                loading: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn announce(&self, action: &LocationAction) {
        self.location.request_change(&format_location(action, &self.base_path));
    }

    /// Load the remote active set into the registry. Malformed records are
    /// skipped with a warning; the rest of the batch still loads.
    pub async fn load_active(&self, filter: ActiveFilter) -> Result<usize, CoordinatorError> {
        let remotes = self.service.list_active(filter).await.map_err(map_service_error)?;
        let total = remotes.len();

        let mut state = self.lock();
        let mut loaded = 0;
        for remote in &remotes {
            if let Some(record) = from_remote(remote) {
                state.registry.upsert(record);
                loaded += 1;
            }
        }
        if loaded < total {
            warn!(skipped = total - loaded, "skipped malformed orders during active-set load");
        }
        Ok(loaded)
    }

    /// Create a new unsaved draft, focus it, and request the create location.
    pub fn new_draft(&self) -> OrderId {
        self.create_draft(true)
    }

    fn create_draft(&self, announce: bool) -> OrderId {
        let record = OrderRecord::new_draft();
        let id = record.id.clone();
        {
            let mut state = self.lock();
            state.registry.upsert(record);
            state.focused = Some(id.clone());
            state.focus_epoch += 1;
        }
        if announce {
            self.announce(&LocationAction::Create);
        }
        info!(order_id = %id, "created draft order");
        id
    }

    /// User-initiated focus change. Focusing the already-focused id is a
    /// no-op; focusing an unknown persisted id fetches it first.
    pub async fn focus(&self, target: Option<OrderId>) -> Result<(), CoordinatorError> {
        self.apply_focus(target, true).await
    }

    /// Externally-driven location change (back/forward, deep link). Adjusts
    /// focus to match but never issues a location-change request itself, so
    /// the two directions cannot feed back into each other.
    pub async fn on_location_changed(&self, new_location: &str) -> Result<(), CoordinatorError> {
        let Some(action) = parse_location(new_location, &self.base_path) else {
            debug!(location = new_location, "ignoring location outside the orders base path");
            return Ok(());
        };
        match action {
            LocationAction::Base => self.apply_focus(None, false).await,
            LocationAction::Create => {
                let already_on_draft =
                    self.lock().focused.as_ref().is_some_and(|id| id.is_draft());
                if !already_on_draft {
                    self.create_draft(false);
                }
                Ok(())
            }
            LocationAction::View(server_id) => {
                self.apply_focus(Some(OrderId::persisted(server_id)), false).await
            }
        }
    }

    async fn apply_focus(
        &self,
        target: Option<OrderId>,
        announce: bool,
    ) -> Result<(), CoordinatorError> {
        let plan = {
            let mut state = self.lock();
            match &target {
                None => {
                    if state.focused.is_none() {
                        FocusPlan::Done
                    } else {
                        state.focused = None;
                        state.focus_epoch += 1;
                        if announce {
                            FocusPlan::Announce(LocationAction::Base)
                        } else {
                            FocusPlan::Done
                        }
                    }
                }
                Some(id) if state.focused.as_ref() == Some(id) => FocusPlan::Done,
                Some(id) if state.registry.contains(id) => {
                    state.focused = Some(id.clone());
                    state.focus_epoch += 1;
                    if announce {
                        FocusPlan::Announce(match id.server_id() {
                            Some(server_id) => LocationAction::View(server_id.to_owned()),
                            None => LocationAction::Create,
                        })
                    } else {
                        FocusPlan::Done
                    }
                }
                Some(id @ OrderId::Draft(_)) => {
                    // A draft that is not in the registry cannot be fetched.
                    return Err(CoordinatorError::UnknownOrder(id.clone()));
                }
                Some(OrderId::Persisted(server_id)) => {
                    if state.loading.contains(server_id) {
                        // A fetch for this id is already outstanding; the
                        // loading flag lets consumers avoid racing a second.
                        FocusPlan::Done
                    } else {
                        state.loading.insert(server_id.clone());
                        state.focus_epoch += 1;
                        FocusPlan::Fetch {
                            server_id: server_id.clone(),
                            epoch: state.focus_epoch,
                        }
                    }
                }
            }
        };

        match plan {
            FocusPlan::Done => Ok(()),
            FocusPlan::Announce(action) => {
                self.announce(&action);
                Ok(())
            }
            FocusPlan::Fetch { server_id, epoch } => {
                self.finish_fetch(server_id, epoch, announce).await
            }
        }
    }

    async fn finish_fetch(
        &self,
        server_id: String,
        epoch: u64,
        announce: bool,
    ) -> Result<(), CoordinatorError> {
        let result = self.service.get_by_id(&server_id).await;

        let mut state = self.lock();
        state.loading.remove(&server_id);
        let superseded = state.focus_epoch != epoch;

        let record = match result {
            Ok(remote) => from_remote(&remote),
            Err(error) => {
                if !superseded {
                    state.focused = None;
                    drop(state);
                    // Fall back to the base location rather than focusing a
                    // missing record.
                    self.announce(&LocationAction::Base);
                }
                return Err(map_service_error(error));
            }
        };

        if superseded {
            // A newer focus action won the race; applying this result now
            // could overwrite fresher state, so it is dropped entirely.
            debug!(order_id = %server_id, "discarding superseded fetch result");
            return Err(CoordinatorError::FetchSuperseded(OrderId::persisted(server_id)));
        }

        let Some(record) = record else {
            state.focused = None;
            drop(state);
            self.announce(&LocationAction::Base);
            return Err(CoordinatorError::Transport(format!(
                "order service returned a malformed order for {server_id}"
            )));
        };

        let id = record.id.clone();
        state.registry.upsert(record);
        state.focused = Some(id);
        drop(state);
        if announce {
            self.announce(&LocationAction::View(server_id));
        }
        Ok(())
    }

    /// Edit one base-form field locally. Rejected once the base data is
    /// locked; invalid values land in `form_errors` and are reported back.
    pub fn update_base_field(
        &self,
        id: &OrderId,
        patch: BaseFieldPatch,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        let record = state
            .registry
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;

        if record.base_data_locked() {
            return Err(DomainError::BaseDataLocked(id.clone()).into());
        }
        if let Some(message) = patch.validate() {
            record.form_errors.insert(patch.field_name().to_owned(), message.to_owned());
            return Err(CoordinatorError::Domain(DomainError::Lifecycle(
                lifecycle::LifecycleError::Validation {
                    field: patch.field_name().to_owned(),
                    message: message.to_owned(),
                },
            )));
        }

        record.form_errors.remove(patch.field_name());
        match patch {
            BaseFieldPatch::Product(value) => record.base.product_id = value,
            BaseFieldPatch::SpecSheet(value) => record.base.spec_sheet_id = value,
            BaseFieldPatch::TargetQuantity(value) => record.base.target_quantity = value,
            BaseFieldPatch::StartDate(value) => record.base.start_date = value,
            BaseFieldPatch::DueDate(value) => record.base.due_date = value,
            BaseFieldPatch::Registrant(value) => record.base.registrant_id = value,
            BaseFieldPatch::Provider(value) => record.base.provider_id = value,
            BaseFieldPatch::InputWeight(value) => record.base.input_weight = value,
            BaseFieldPatch::ExpectedWeight(value) => record.base.expected_weight = value,
            BaseFieldPatch::Observations(value) => record.base.observations = value,
        }
        Ok(())
    }

    /// Attach the step sequence from the selected specification. Only allowed
    /// while the base data is unlocked; replaces any previously attached
    /// steps.
    pub fn configure_steps(
        &self,
        id: &OrderId,
        drafts: Vec<StepDraft>,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        let record = state
            .registry
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
        if record.base_data_locked() {
            return Err(DomainError::BaseDataLocked(id.clone()).into());
        }

        let mut steps: Vec<Step> = drafts
            .into_iter()
            .map(|draft| Step {
                id: Uuid::new_v4().to_string(),
                process_order: draft.process_order,
                process_name: draft.process_name,
                process_description: draft.process_description,
                assigned_worker_id: None,
                started_at: None,
                finished_at: None,
                status: StepStatus::Pending,
                observations: String::new(),
            })
            .collect();
        steps.sort_by_key(|step| step.process_order);
        record.steps = steps;
        record.active_step_index =
            lifecycle::derive_active_step_index(&record.status, &record.steps);
        Ok(())
    }

    /// Pick (or clear) the worker for a pending step. Local edit, carried to
    /// the server by the next save or step operation.
    pub fn assign_worker(
        &self,
        id: &OrderId,
        step_index: usize,
        worker_id: Option<String>,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        let record = state
            .registry
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
        lifecycle::assign_worker(record, step_index, worker_id)?;
        Ok(())
    }

    /// Edit a step's observations. Allowed until the order reaches a terminal
    /// status.
    pub fn update_step_observations(
        &self,
        id: &OrderId,
        step_index: usize,
        observations: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        let record = state
            .registry
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
        if record.status.is_terminal() {
            return Err(DomainError::InvariantViolation(
                "steps of a finished order are read-only".to_owned(),
            )
            .into());
        }
        let step = record
            .steps
            .get_mut(step_index)
            .ok_or(lifecycle::LifecycleError::StepOutOfRange { index: step_index })
            .map_err(DomainError::Lifecycle)?;
        step.observations = observations.into();
        Ok(())
    }

    /// Persist the record. Drafts are created (and atomically rekeyed to the
    /// server-assigned id); persisted orders are updated. Local edits are
    /// kept on transport failure so the user can retry.
    pub async fn save(&self, id: &OrderId) -> Result<OrderId, CoordinatorError> {
        let snapshot = self
            .lock()
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
        let payload = to_remote_payload(&snapshot);

        match id.server_id() {
            Some(server_id) => {
                let remote =
                    self.service.update(server_id, payload).await.map_err(map_service_error)?;
                let mut state = self.lock();
                match from_remote(&remote) {
                    Some(record) => state.registry.upsert(record),
                    None => warn!(order_id = %id, "malformed update response, keeping local state"),
                }
                Ok(id.clone())
            }
            None => {
                let remote = self.service.create(payload).await.map_err(map_service_error)?;
                let record = from_remote(&remote).ok_or_else(|| {
                    CoordinatorError::Transport(
                        "order service returned a malformed order on create".to_owned(),
                    )
                })?;
                let new_id = record.id.clone();
                let announce = {
                    // One lock scope: remove old key, insert new key, move the
                    // focus pointer. Nothing can observe an intermediate state.
                    let mut state = self.lock();
                    state.registry.rekey(id, record)?;
                    if state.focused.as_ref() == Some(id) {
                        state.focused = Some(new_id.clone());
                        state.focus_epoch += 1;
                        true
                    } else {
                        false
                    }
                };
                if announce {
                    if let Some(server_id) = new_id.server_id() {
                        self.announce(&LocationAction::View(server_id.to_owned()));
                    }
                }
                info!(draft_id = %id, order_id = %new_id, "draft persisted and rekeyed");
                Ok(new_id)
            }
        }
    }

    /// Apply an order-level lifecycle event. Transition and validation errors
    /// are rejected synchronously, before any network call; for persisted
    /// orders the new status is applied optimistically and reverted if the
    /// server rejects it. Draft transitions stay local until `save`.
    pub async fn apply_order_event(
        &self,
        id: &OrderId,
        event: OrderEvent,
    ) -> Result<TransitionOutcome, CoordinatorError> {
        let (snapshot, outcome) = {
            let mut state = self.lock();
            let record = state
                .registry
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
            let snapshot = record.clone();
            let mut working = record.clone();
            let outcome = lifecycle::apply_event(&mut working, &event)?;
            state.registry.upsert(working);
            (snapshot, outcome)
        };

        let Some(server_id) = id.server_id() else {
            return Ok(outcome);
        };

        let result = match &event {
            OrderEvent::Finalize { data } => self.service.finalize(server_id, data.clone()).await,
            OrderEvent::Cancel { reason } => {
                self.service
                    .change_status(
                        server_id,
                        outcome.to.wire_value(),
                        StatusChangeMeta { reason: Some(reason.clone()) },
                    )
                    .await
            }
            _ => {
                self.service
                    .change_status(server_id, outcome.to.wire_value(), StatusChangeMeta::default())
                    .await
            }
        };
        self.confirm_or_revert(id, snapshot, result)?;
        Ok(outcome)
    }

    /// Cancel with an audit reason. Thin wrapper over `apply_order_event`.
    pub async fn cancel(
        &self,
        id: &OrderId,
        reason: impl Into<String>,
    ) -> Result<TransitionOutcome, CoordinatorError> {
        self.apply_order_event(id, OrderEvent::Cancel { reason: reason.into() }).await
    }

    pub async fn finalize(
        &self,
        id: &OrderId,
        data: FinalizationData,
    ) -> Result<TransitionOutcome, CoordinatorError> {
        self.apply_order_event(id, OrderEvent::Finalize { data }).await
    }

    /// Start the active step. Validated locally first, then persisted via a
    /// full update; the optimistic step state is reverted on failure.
    pub async fn start_step(&self, id: &OrderId, index: usize) -> Result<(), CoordinatorError> {
        let (snapshot, payload) = {
            let mut state = self.lock();
            let record = state
                .registry
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
            let snapshot = record.clone();
            let mut working = record.clone();
            lifecycle::start_step(&mut working, index, Utc::now())?;
            let payload = to_remote_payload(&working);
            state.registry.upsert(working);
            (snapshot, payload)
        };

        let Some(server_id) = id.server_id() else {
            return Ok(());
        };
        let result = self.service.update(server_id, payload).await;
        self.confirm_or_revert(id, snapshot, result)
    }

    /// Complete the active step. Completing the last open step also moves the
    /// order to ALL_STEPS_COMPLETED; the order-level transition, if any, is
    /// returned.
    pub async fn complete_step(
        &self,
        id: &OrderId,
        index: usize,
    ) -> Result<Option<TransitionOutcome>, CoordinatorError> {
        let (snapshot, payload, outcome) = {
            let mut state = self.lock();
            let record = state
                .registry
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
            let snapshot = record.clone();
            let mut working = record.clone();
            let outcome = lifecycle::complete_step(&mut working, index, Utc::now())?;
            let payload = to_remote_payload(&working);
            state.registry.upsert(working);
            (snapshot, payload, outcome)
        };

        let Some(server_id) = id.server_id() else {
            return Ok(outcome);
        };
        let result = self.service.update(server_id, payload).await;
        self.confirm_or_revert(id, snapshot, result)?;
        Ok(outcome)
    }

    /// Drop an order from the active set. Unsaved drafts can always be
    /// discarded; persisted orders only once the server has confirmed a
    /// terminal status.
    pub fn remove(&self, id: &OrderId) -> Result<(), CoordinatorError> {
        let announce = {
            let mut state = self.lock();
            let record = state
                .registry
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownOrder(id.clone()))?;
            if !id.is_draft() && !record.status.is_terminal() {
                return Err(DomainError::InvariantViolation(
                    "only cancelled or completed orders can be removed".to_owned(),
                )
                .into());
            }
            state.registry.remove(id);
            if state.focused.as_ref() == Some(id) {
                state.focused = None;
                state.focus_epoch += 1;
                true
            } else {
                false
            }
        };
        if announce {
            self.announce(&LocationAction::Base);
        }
        Ok(())
    }

    /// The single confirm-or-revert helper behind every optimistic mutation:
    /// on success the server response replaces the optimistic record, on
    /// failure the pre-call snapshot is restored.
    fn confirm_or_revert(
        &self,
        id: &OrderId,
        snapshot: OrderRecord,
        result: Result<RemoteOrder, ServiceError>,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        match result {
            Ok(remote) => {
                match from_remote(&remote) {
                    Some(record) => state.registry.upsert(record),
                    // The server accepted the mutation; a malformed echo is
                    // not a reason to roll back.
                    None => warn!(order_id = %id, "malformed response, keeping optimistic state"),
                }
                Ok(())
            }
            Err(error) => {
                state.registry.upsert(snapshot);
                Err(map_service_error(error))
            }
        }
    }

    // Read-only views.

    pub fn focused(&self) -> Option<OrderId> {
        self.lock().focused.clone()
    }

    pub fn record(&self, id: &OrderId) -> Option<OrderRecord> {
        self.lock().registry.get(id).cloned()
    }

    /// True while a fetch for this server id is outstanding.
    pub fn is_loading(&self, server_id: &str) -> bool {
        self.lock().loading.contains(server_id)
    }

    /// Rows for the list/sidebar. Terminal orders stay in the registry but
    /// are filtered here unless asked for.
    pub fn summaries(&self, include_terminal: bool) -> Vec<OrderSummary> {
        let state = self.lock();
        let mut rows: Vec<OrderSummary> = state
            .registry
            .all()
            .filter(|record| include_terminal || !record.status.is_terminal())
            .map(|record| {
                let (steps_completed, steps_total) = record.step_progress();
                OrderSummary {
                    id: record.id.clone(),
                    order_number: if record.id.is_draft() {
                        "(unsaved)".to_owned()
                    } else {
                        record.order_number.clone()
                    },
                    product_name: record.product_name.clone(),
                    status_label: record.status_display().to_owned(),
                    steps_completed,
                    steps_total,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        rows
    }
}

fn map_service_error(error: ServiceError) -> CoordinatorError {
    match error {
        ServiceError::Transport(message) => CoordinatorError::Transport(message),
        ServiceError::Decode(message) => {
            CoordinatorError::Transport(format!("decode failure: {message}"))
        }
        ServiceError::Validation { field, message } => {
            CoordinatorError::RemoteValidation { field, message }
        }
        ServiceError::NotFound(id) => CoordinatorError::UnknownOrder(OrderId::persisted(id)),
    }
}
