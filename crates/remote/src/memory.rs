//! Deterministic in-process implementation of the Remote Order Service.
//!
//! Used by tests and the CLI smoke run. Ids are assigned sequentially and a
//! one-shot failure can be injected to exercise rollback paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use prodflow_core::domain::order::{FinalizationData, OrderStatus};
use prodflow_core::transcode::{OrderPayload, RemoteOrder, RemoteStep};

use crate::{ActiveFilter, RemoteOrderService, ServiceError, StatusChangeMeta};

pub struct InMemoryOrderService {
    orders: RwLock<HashMap<i64, RemoteOrder>>,
    next_order_id: AtomicI64,
    next_step_id: AtomicI64,
    fail_next: AtomicBool,
}

// A derived Default would start the id counters at 0; ids are 1-based.
impl Default for InMemoryOrderService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            next_order_id: AtomicI64::new(1),
            next_step_id: AtomicI64::new(1),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Pre-load an order, e.g. for focus/fetch tests. The record must carry
    /// an id already.
    pub async fn seed(&self, order: RemoteOrder) {
        let id = order.id.expect("seeded orders need an id");
        self.next_order_id.fetch_max(id + 1, Ordering::SeqCst);
        self.orders.write().await.insert(id, order);
    }

    /// Make the next service call fail with a transport error.
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<(), ServiceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Transport("injected transport failure".to_owned()));
        }
        Ok(())
    }

    fn parse_id(id: &str) -> Result<i64, ServiceError> {
        id.parse().map_err(|_| ServiceError::NotFound(id.to_owned()))
    }

    fn apply_payload(&self, order: &mut RemoteOrder, payload: OrderPayload) {
        order.status = Some(payload.status);
        order.product_name = payload
            .product_id
            .as_deref()
            .map(|product_id| format!("Product {product_id}"))
            .or(order.product_name.take());
        order.product_id = payload.product_id;
        order.spec_sheet_id = payload.spec_sheet_id;
        order.target_quantity = payload.target_quantity;
        order.start_date = payload.start_date;
        order.due_date = payload.due_date;
        order.registrant_id = payload.registrant_id;
        order.provider_id = payload.provider_id;
        order.input_weight = payload.input_weight;
        order.expected_weight = payload.expected_weight;
        order.observations = Some(payload.observations);
        order.cancellation_reason = payload.cancellation_reason;
        order.produced_quantity = payload.produced_quantity;
        order.steps = payload
            .steps
            .into_iter()
            .map(|step| RemoteStep {
                id: Some(
                    step.id.unwrap_or_else(|| self.next_step_id.fetch_add(1, Ordering::SeqCst)),
                ),
                process_order: Some(step.process_order),
                process_name: Some(step.process_name),
                process_description: Some(step.process_description),
                assigned_worker_id: step.assigned_worker_id,
                started_at: step.started_at,
                finished_at: step.finished_at,
                observations: Some(step.observations),
            })
            .collect();
        order.updated_at = Some(Utc::now());
    }

    fn is_terminal(order: &RemoteOrder) -> bool {
        order.status.as_deref().map(OrderStatus::parse).is_some_and(|status| status.is_terminal())
    }
}

#[async_trait]
impl RemoteOrderService for InMemoryOrderService {
    async fn list_active(&self, filter: ActiveFilter) -> Result<Vec<RemoteOrder>, ServiceError> {
        self.check_injected_failure()?;
        let orders = self.orders.read().await;
        let mut active: Vec<RemoteOrder> = orders
            .values()
            .filter(|order| filter.include_terminal || !Self::is_terminal(order))
            .cloned()
            .collect();
        active.sort_by_key(|order| order.id);
        Ok(active)
    }

    async fn get_by_id(&self, id: &str) -> Result<RemoteOrder, ServiceError> {
        self.check_injected_failure()?;
        let key = Self::parse_id(id)?;
        let orders = self.orders.read().await;
        orders.get(&key).cloned().ok_or_else(|| ServiceError::NotFound(id.to_owned()))
    }

    async fn create(&self, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        self.check_injected_failure()?;
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        let mut order = RemoteOrder {
            id: Some(id),
            order_number: Some(format!("OP-{id:04}")),
            created_at: Some(now),
            ..RemoteOrder::default()
        };
        self.apply_payload(&mut order, payload);

        self.orders.write().await.insert(id, order.clone());
        Ok(order)
    }

    async fn update(&self, id: &str, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        self.check_injected_failure()?;
        let key = Self::parse_id(id)?;
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&key).ok_or_else(|| ServiceError::NotFound(id.to_owned()))?;
        self.apply_payload(order, payload);
        Ok(order.clone())
    }

    async fn change_status(
        &self,
        id: &str,
        status: &str,
        meta: StatusChangeMeta,
    ) -> Result<RemoteOrder, ServiceError> {
        self.check_injected_failure()?;
        let key = Self::parse_id(id)?;
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&key).ok_or_else(|| ServiceError::NotFound(id.to_owned()))?;
        order.status = Some(status.to_owned());
        if meta.reason.is_some() {
            order.cancellation_reason = meta.reason;
        }
        order.updated_at = Some(Utc::now());
        Ok(order.clone())
    }

    async fn finalize(
        &self,
        id: &str,
        data: FinalizationData,
    ) -> Result<RemoteOrder, ServiceError> {
        self.check_injected_failure()?;
        let key = Self::parse_id(id)?;
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&key).ok_or_else(|| ServiceError::NotFound(id.to_owned()))?;

        let status = order.status.as_deref().map(OrderStatus::parse);
        if status != Some(OrderStatus::AllStepsCompleted) {
            return Err(ServiceError::Validation {
                field: None,
                message: "only an order with all steps completed can be finalized".to_owned(),
            });
        }
        order.status = Some(OrderStatus::Completed.wire_value().to_owned());
        order.produced_quantity = Some(data.produced_quantity);
        if let Some(observations) = data.observations {
            order.observations = Some(observations);
        }
        order.updated_at = Some(Utc::now());
        Ok(order.clone())
    }
}
