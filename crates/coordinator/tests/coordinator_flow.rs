use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use prodflow_coordinator::{BaseFieldPatch, Coordinator, RecordingLocationProvider, StepDraft};
use prodflow_core::domain::order::{FinalizationData, OrderId, OrderStatus};
use prodflow_core::domain::step::StepStatus;
use prodflow_core::errors::CoordinatorError;
use prodflow_core::lifecycle::OrderEvent;
use prodflow_core::transcode::{OrderPayload, RemoteOrder, RemoteStep};
use prodflow_remote::{
    ActiveFilter, InMemoryOrderService, RemoteOrderService, ServiceError, StatusChangeMeta,
};

const BASE: &str = "/production-orders";

fn setup() -> (Arc<InMemoryOrderService>, RecordingLocationProvider, Coordinator) {
    let service = Arc::new(InMemoryOrderService::new());
    let location = RecordingLocationProvider::default();
    let coordinator = Coordinator::new(BASE, service.clone(), Arc::new(location.clone()));
    (service, location, coordinator)
}

fn remote_order(id: i64, status: &str, steps: Vec<RemoteStep>) -> RemoteOrder {
    RemoteOrder {
        id: Some(id),
        order_number: Some(format!("OP-{id:04}")),
        status: Some(status.to_owned()),
        product_id: Some("prod-1".to_owned()),
        product_name: Some("Steel bracket".to_owned()),
        target_quantity: Some(Decimal::new(100, 0)),
        steps,
        ..RemoteOrder::default()
    }
}

fn pending_step(id: i64, process_order: u32, worker: Option<&str>) -> RemoteStep {
    RemoteStep {
        id: Some(id),
        process_order: Some(process_order),
        process_name: Some(format!("Process {process_order}")),
        assigned_worker_id: worker.map(str::to_owned),
        ..RemoteStep::default()
    }
}

#[tokio::test]
async fn new_draft_creates_one_pending_record_and_requests_create_location() {
    let (_service, location, coordinator) = setup();

    let id = coordinator.new_draft();

    let record = coordinator.record(&id).expect("draft in registry");
    assert_eq!(record.status, OrderStatus::Pending);
    assert!(record.is_new_for_form);
    assert_eq!(coordinator.summaries(false).len(), 1);
    assert_eq!(coordinator.focused(), Some(id));
    assert_eq!(location.requests(), vec![format!("{BASE}/create")]);
}

#[tokio::test]
async fn focusing_the_focused_id_is_idempotent() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(1, "PENDING", Vec::new())).await;

    coordinator.focus(Some(OrderId::persisted("1"))).await.expect("first focus");
    let requests_before = location.requests().len();
    let record_before = coordinator.record(&OrderId::persisted("1"));

    coordinator.focus(Some(OrderId::persisted("1"))).await.expect("second focus");

    assert_eq!(location.requests().len(), requests_before);
    assert_eq!(coordinator.record(&OrderId::persisted("1")), record_before);
}

#[tokio::test]
async fn load_active_populates_the_registry() {
    let (service, _location, coordinator) = setup();
    service.seed(remote_order(1, "PENDING", Vec::new())).await;
    service.seed(remote_order(7, "SETUP", Vec::new())).await;

    let loaded = coordinator.load_active(ActiveFilter::default()).await.expect("load");

    assert_eq!(loaded, 2);
    assert_eq!(coordinator.summaries(false).len(), 2);
    assert_eq!(coordinator.focused(), None, "loading never steals focus");
}

#[tokio::test]
async fn deep_link_fetches_and_focuses_without_location_request() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(3, "IN_PROGRESS", vec![pending_step(1, 1, Some("w-1"))])).await;

    coordinator.on_location_changed(&format!("{BASE}/3")).await.expect("deep link");

    assert_eq!(coordinator.focused(), Some(OrderId::persisted("3")));
    assert!(location.requests().is_empty(), "one-way sync must not echo a location change");
    let record = coordinator.record(&OrderId::persisted("3")).expect("fetched");
    assert_eq!(record.active_step_index, Some(0));
}

#[tokio::test]
async fn location_change_matching_focus_is_a_no_op() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(4, "PENDING", Vec::new())).await;
    coordinator.focus(Some(OrderId::persisted("4"))).await.expect("focus");
    let requests_before = location.requests().len();

    coordinator.on_location_changed(&format!("{BASE}/4")).await.expect("same location");

    assert_eq!(location.requests().len(), requests_before);
    assert_eq!(coordinator.focused(), Some(OrderId::persisted("4")));
}

#[tokio::test]
async fn base_location_clears_focus_without_echo() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(5, "PENDING", Vec::new())).await;
    coordinator.focus(Some(OrderId::persisted("5"))).await.expect("focus");
    let requests_before = location.requests().len();

    coordinator.on_location_changed(BASE).await.expect("back to base");

    assert_eq!(coordinator.focused(), None);
    assert_eq!(location.requests().len(), requests_before);
}

#[tokio::test]
async fn fetch_failure_leaves_focus_unset_and_falls_back_to_base() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(6, "PENDING", Vec::new())).await;
    service.fail_next_call();

    let error = coordinator
        .focus(Some(OrderId::persisted("6")))
        .await
        .expect_err("fetch must fail");

    assert!(matches!(error, CoordinatorError::Transport(_)));
    assert_eq!(coordinator.focused(), None);
    assert_eq!(location.last().as_deref(), Some(BASE));
    assert!(coordinator.record(&OrderId::persisted("6")).is_none());
    assert!(!coordinator.is_loading("6"));
}

#[tokio::test]
async fn saving_a_draft_rekeys_atomically_and_updates_focus() {
    let (service, location, coordinator) = setup();

    let draft_id = coordinator.new_draft();
    coordinator
        .update_base_field(&draft_id, BaseFieldPatch::Product(Some("prod-9".to_owned())))
        .expect("set product");
    coordinator
        .update_base_field(
            &draft_id,
            BaseFieldPatch::TargetQuantity(Some(Decimal::new(40, 0))),
        )
        .expect("set quantity");

    let new_id = coordinator.save(&draft_id).await.expect("create");

    assert_eq!(new_id, OrderId::persisted("1"));
    assert!(coordinator.record(&draft_id).is_none(), "old key must be gone");
    let record = coordinator.record(&new_id).expect("present under new key");
    assert!(!record.is_new_for_form);
    assert_eq!(record.base.product_id.as_deref(), Some("prod-9"));
    assert_eq!(coordinator.focused(), Some(new_id));
    assert_eq!(location.last().as_deref(), Some(&*format!("{BASE}/1")));
    assert_eq!(service.get_by_id("1").await.expect("on server").id, Some(1));
}

#[tokio::test]
async fn failed_status_change_rolls_back_the_optimistic_update() {
    let (service, _location, coordinator) = setup();
    service.seed(remote_order(1, "IN_PROGRESS", vec![pending_step(1, 1, Some("w-1"))])).await;
    coordinator.load_active(ActiveFilter::default()).await.expect("load");
    let id = OrderId::persisted("1");
    let before = coordinator.record(&id).expect("loaded");

    service.fail_next_call();
    let error = coordinator
        .apply_order_event(&id, OrderEvent::Pause)
        .await
        .expect_err("transport failure");

    assert!(matches!(error, CoordinatorError::Transport(_)));
    assert_eq!(coordinator.record(&id).expect("still there"), before);
}

#[tokio::test]
async fn start_step_without_worker_is_rejected_before_any_network_call() {
    let (service, _location, coordinator) = setup();
    service.seed(remote_order(1, "IN_PROGRESS", vec![pending_step(1, 1, None)])).await;
    coordinator.load_active(ActiveFilter::default()).await.expect("load");
    let id = OrderId::persisted("1");

    // Arm a failure; if the coordinator reached the network it would trip.
    service.fail_next_call();
    let error = coordinator.start_step(&id, 0).await.expect_err("no worker");
    assert!(error.is_validation());

    let record = coordinator.record(&id).expect("unchanged");
    assert_eq!(record.steps[0].status, StepStatus::Pending);
    // The armed failure is still pending, proving no call was issued.
    assert!(matches!(
        service.get_by_id("1").await.expect_err("armed failure fires here"),
        ServiceError::Transport(_)
    ));
}

#[tokio::test]
async fn full_lifecycle_from_draft_to_completed() {
    let (service, _location, coordinator) = setup();

    let draft_id = coordinator.new_draft();
    coordinator
        .update_base_field(&draft_id, BaseFieldPatch::Product(Some("prod-2".to_owned())))
        .expect("product");
    coordinator
        .update_base_field(
            &draft_id,
            BaseFieldPatch::TargetQuantity(Some(Decimal::new(12, 0))),
        )
        .expect("quantity");
    coordinator
        .configure_steps(
            &draft_id,
            vec![
                StepDraft {
                    process_order: 2,
                    process_name: "Welding".to_owned(),
                    process_description: String::new(),
                },
                StepDraft {
                    process_order: 1,
                    process_name: "Cutting".to_owned(),
                    process_description: String::new(),
                },
            ],
        )
        .expect("steps");
    coordinator
        .apply_order_event(&draft_id, OrderEvent::SaveSetup)
        .await
        .expect("pending -> setup");

    let id = coordinator.save(&draft_id).await.expect("create");
    // Steps were sorted by process_order at configuration time.
    let record = coordinator.record(&id).expect("persisted");
    assert_eq!(record.steps[0].process_name, "Cutting");

    coordinator.apply_order_event(&id, OrderEvent::ValidateSetup).await.expect("validate");
    coordinator
        .apply_order_event(&id, OrderEvent::StartProduction)
        .await
        .expect("start production");
    assert_eq!(coordinator.record(&id).expect("r").status, OrderStatus::InProgress);

    coordinator.assign_worker(&id, 0, Some("w-7".to_owned())).expect("worker step 0");
    coordinator.start_step(&id, 0).await.expect("start step 0");
    assert!(coordinator.complete_step(&id, 0).await.expect("complete step 0").is_none());

    coordinator.assign_worker(&id, 1, Some("w-8".to_owned())).expect("worker step 1");
    coordinator.start_step(&id, 1).await.expect("start step 1");
    let outcome = coordinator.complete_step(&id, 1).await.expect("complete step 1");
    assert_eq!(outcome.expect("order transition").to, OrderStatus::AllStepsCompleted);
    assert_eq!(coordinator.record(&id).expect("r").active_step_index, Some(1));

    coordinator
        .finalize(
            &id,
            FinalizationData { produced_quantity: Decimal::new(11, 0), observations: None },
        )
        .await
        .expect("finalize");
    let done = coordinator.record(&id).expect("r");
    assert_eq!(done.status, OrderStatus::Completed);
    assert_eq!(done.produced_quantity, Some(Decimal::new(11, 0)));

    let server_side = service.get_by_id(id.server_id().expect("server id")).await.expect("get");
    assert_eq!(server_side.status.as_deref(), Some("COMPLETED"));
}

#[tokio::test]
async fn base_fields_lock_once_configuration_is_validated() {
    let (service, _location, coordinator) = setup();
    service.seed(remote_order(1, "SETUP_COMPLETED", Vec::new())).await;
    coordinator.load_active(ActiveFilter::default()).await.expect("load");
    let id = OrderId::persisted("1");

    let error = coordinator
        .update_base_field(&id, BaseFieldPatch::Product(Some("other".to_owned())))
        .expect_err("base data is locked");
    assert!(matches!(
        error,
        CoordinatorError::Domain(prodflow_core::errors::DomainError::BaseDataLocked(_))
    ));
}

#[tokio::test]
async fn cancellation_reason_is_required_and_retained() {
    let (service, _location, coordinator) = setup();
    service.seed(remote_order(1, "IN_PROGRESS", vec![pending_step(1, 1, None)])).await;
    coordinator.load_active(ActiveFilter::default()).await.expect("load");
    let id = OrderId::persisted("1");

    let error = coordinator.cancel(&id, "").await.expect_err("reason required");
    assert!(error.is_validation());
    assert_eq!(coordinator.record(&id).expect("r").status, OrderStatus::InProgress);

    coordinator.cancel(&id, "machine breakdown").await.expect("cancel");
    let record = coordinator.record(&id).expect("r");
    assert_eq!(record.status, OrderStatus::Cancelled);
    assert_eq!(record.cancellation_reason.as_deref(), Some("machine breakdown"));

    let server_side = service.get_by_id("1").await.expect("get");
    assert_eq!(server_side.cancellation_reason.as_deref(), Some("machine breakdown"));
}

#[tokio::test]
async fn active_orders_can_only_be_removed_after_a_terminal_status() {
    let (service, location, coordinator) = setup();
    service.seed(remote_order(1, "IN_PROGRESS", Vec::new())).await;
    coordinator.load_active(ActiveFilter::default()).await.expect("load");
    let id = OrderId::persisted("1");
    coordinator.focus(Some(id.clone())).await.expect("focus");

    let error = coordinator.remove(&id).expect_err("still running");
    assert!(matches!(error, CoordinatorError::Domain(_)));

    coordinator.cancel(&id, "scrapped").await.expect("cancel");
    // Terminal orders disappear from the default summary view but stay in
    // the registry until removed.
    assert!(coordinator.summaries(false).is_empty());
    assert_eq!(coordinator.summaries(true).len(), 1);

    coordinator.remove(&id).expect("remove terminal order");
    assert!(coordinator.record(&id).is_none());
    assert_eq!(coordinator.focused(), None);
    assert_eq!(location.last().as_deref(), Some(BASE));
}

#[tokio::test]
async fn discarding_an_unsaved_draft_never_touches_the_network() {
    let (service, _location, coordinator) = setup();
    let draft_id = coordinator.new_draft();

    service.fail_next_call();
    coordinator.remove(&draft_id).expect("discard draft");
    assert!(coordinator.record(&draft_id).is_none());

    // The armed failure is untouched, proving no call was issued.
    assert!(matches!(
        service.list_active(ActiveFilter::default()).await,
        Err(ServiceError::Transport(_))
    ));
}

/// Service wrapper that parks the first fetch for one id until released,
/// so a second focus can win the race.
struct GatedService {
    inner: InMemoryOrderService,
    gate: Notify,
    gated_id: String,
    armed: AtomicBool,
}

impl GatedService {
    fn new(gated_id: &str) -> Self {
        Self {
            inner: InMemoryOrderService::new(),
            gate: Notify::new(),
            gated_id: gated_id.to_owned(),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RemoteOrderService for GatedService {
    async fn list_active(&self, filter: ActiveFilter) -> Result<Vec<RemoteOrder>, ServiceError> {
        self.inner.list_active(filter).await
    }

    async fn get_by_id(&self, id: &str) -> Result<RemoteOrder, ServiceError> {
        if id == self.gated_id && self.armed.swap(false, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.inner.get_by_id(id).await
    }

    async fn create(&self, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        self.inner.create(payload).await
    }

    async fn update(&self, id: &str, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        self.inner.update(id, payload).await
    }

    async fn change_status(
        &self,
        id: &str,
        status: &str,
        meta: StatusChangeMeta,
    ) -> Result<RemoteOrder, ServiceError> {
        self.inner.change_status(id, status, meta).await
    }

    async fn finalize(
        &self,
        id: &str,
        data: FinalizationData,
    ) -> Result<RemoteOrder, ServiceError> {
        self.inner.finalize(id, data).await
    }
}

#[tokio::test]
async fn a_superseded_fetch_is_discarded_instead_of_stealing_focus() {
    let service = Arc::new(GatedService::new("1"));
    service.inner.seed(remote_order(1, "PENDING", Vec::new())).await;
    service.inner.seed(remote_order(2, "PENDING", Vec::new())).await;
    let location = RecordingLocationProvider::default();
    let coordinator = Coordinator::new(BASE, service.clone(), Arc::new(location));

    let slow = coordinator.focus(Some(OrderId::persisted("1")));
    let fast = async {
        assert!(coordinator.is_loading("1"));
        coordinator.focus(Some(OrderId::persisted("2"))).await.expect("focus 2");
        service.gate.notify_waiters();
    };

    let (slow_result, ()) = tokio::join!(slow, fast);

    assert!(matches!(slow_result, Err(CoordinatorError::FetchSuperseded(_))));
    assert_eq!(coordinator.focused(), Some(OrderId::persisted("2")));
    // The stale result was discarded, not applied.
    assert!(coordinator.record(&OrderId::persisted("1")).is_none());
    assert!(!coordinator.is_loading("1"));
}
