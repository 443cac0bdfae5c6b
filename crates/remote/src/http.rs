//! HTTP implementation of the Remote Order Service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use prodflow_core::config::RemoteConfig;
use prodflow_core::domain::order::FinalizationData;
use prodflow_core::transcode::{OrderPayload, RemoteOrder};

use crate::{ActiveFilter, RemoteOrderService, ServiceError, StatusChangeMeta};

pub struct HttpOrderService {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
}

/// Error body the order service sends for 4xx rejections.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    field: Option<String>,
    message: Option<String>,
}

impl HttpOrderService {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ServiceError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/production-orders{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn decode_order(response: Response, id: &str) -> Result<RemoteOrder, ServiceError> {
        let response = Self::check_status(response, id).await?;
        response.json().await.map_err(|error| ServiceError::Decode(error.to_string()))
    }

    async fn check_status(response: Response, id: &str) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(id.to_owned()));
        }
        if status.is_client_error() {
            let body: ApiErrorBody = response.json().await.unwrap_or_default();
            return Err(ServiceError::Validation {
                field: body.field,
                message: body.message.unwrap_or_else(|| format!("request rejected ({status})")),
            });
        }
        Err(ServiceError::Transport(format!("order service returned {status}")))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|error| ServiceError::Transport(error.to_string()))
    }
}

#[async_trait]
impl RemoteOrderService for HttpOrderService {
    async fn list_active(&self, filter: ActiveFilter) -> Result<Vec<RemoteOrder>, ServiceError> {
        let request = self
            .client
            .get(self.url(""))
            .query(&[("include_terminal", filter.include_terminal)]);
        let response = Self::check_status(self.send(request).await?, "").await?;
        response.json().await.map_err(|error| ServiceError::Decode(error.to_string()))
    }

    async fn get_by_id(&self, id: &str) -> Result<RemoteOrder, ServiceError> {
        let request = self.client.get(self.url(&format!("/{id}")));
        Self::decode_order(self.send(request).await?, id).await
    }

    async fn create(&self, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        let request = self.client.post(self.url("")).json(&payload);
        Self::decode_order(self.send(request).await?, "new").await
    }

    async fn update(&self, id: &str, payload: OrderPayload) -> Result<RemoteOrder, ServiceError> {
        let request = self.client.put(self.url(&format!("/{id}"))).json(&payload);
        Self::decode_order(self.send(request).await?, id).await
    }

    async fn change_status(
        &self,
        id: &str,
        status: &str,
        meta: StatusChangeMeta,
    ) -> Result<RemoteOrder, ServiceError> {
        let body = serde_json::json!({ "status": status, "reason": meta.reason });
        let request = self.client.post(self.url(&format!("/{id}/status"))).json(&body);
        Self::decode_order(self.send(request).await?, id).await
    }

    async fn finalize(
        &self,
        id: &str,
        data: FinalizationData,
    ) -> Result<RemoteOrder, ServiceError> {
        let request = self.client.post(self.url(&format!("/{id}/finalize"))).json(&data);
        Self::decode_order(self.send(request).await?, id).await
    }
}
