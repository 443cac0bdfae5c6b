//! Remote Order Service boundary.
//!
//! The coordinator talks to the persistence service exclusively through the
//! [`RemoteOrderService`] trait; `http` provides the production client and
//! `memory` a deterministic in-process fake for tests and smoke runs.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use prodflow_core::domain::order::FinalizationData;
use prodflow_core::transcode::{OrderPayload, RemoteOrder};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote validation rejected {field:?}: {message}")]
    Validation { field: Option<String>, message: String },
    #[error("order {0} was not found")]
    NotFound(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Filter for `list_active`. Terminal orders are excluded by default; the
/// presentation layer opts in when it wants history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub include_terminal: bool,
}

/// Extra data carried by a status-change call, e.g. the cancellation reason.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[async_trait]
pub trait RemoteOrderService: Send + Sync {
    async fn list_active(&self, filter: ActiveFilter) -> Result<Vec<RemoteOrder>, ServiceError>;
    async fn get_by_id(&self, id: &str) -> Result<RemoteOrder, ServiceError>;
    async fn create(&self, payload: OrderPayload) -> Result<RemoteOrder, ServiceError>;
    async fn update(&self, id: &str, payload: OrderPayload) -> Result<RemoteOrder, ServiceError>;
    async fn change_status(
        &self,
        id: &str,
        status: &str,
        meta: StatusChangeMeta,
    ) -> Result<RemoteOrder, ServiceError>;
    async fn finalize(&self, id: &str, data: FinalizationData)
        -> Result<RemoteOrder, ServiceError>;
}

pub use http::HttpOrderService;
pub use memory::InMemoryOrderService;
