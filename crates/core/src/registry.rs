//! Order Registry
//!
//! The single in-memory source of truth for every active order. Updates
//! always replace the whole record, so a reader can never observe a
//! half-updated order. Every operation is synchronous; in particular `rekey`
//! contains no suspension point, which is what makes it atomic under the
//! cooperative scheduling model.

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::order::{OrderId, OrderRecord};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("order {0} is not in the registry")]
    NotFound(OrderId),
    #[error("order {0} is already in the registry")]
    AlreadyPresent(OrderId),
    #[error("rekey requires a draft id, got {0}")]
    NotADraft(OrderId),
}

#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: HashMap<OrderId, OrderRecord>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record stored under `id`. Whole-record,
    /// last-writer-wins.
    pub fn upsert(&mut self, record: OrderRecord) {
        self.orders.insert(record.id.clone(), record);
    }

    /// Atomically replace a draft id with its server-assigned id, merging the
    /// server's record over the draft. Server fields win; local-only
    /// `form_errors` are dropped; fields the server does not own are kept
    /// from the draft. Used exactly once per draft, on first create.
    pub fn rekey(
        &mut self,
        old_id: &OrderId,
        mut server_record: OrderRecord,
    ) -> Result<(), RegistryError> {
        if !old_id.is_draft() {
            return Err(RegistryError::NotADraft(old_id.clone()));
        }
        if self.orders.contains_key(&server_record.id) {
            return Err(RegistryError::AlreadyPresent(server_record.id.clone()));
        }
        let draft =
            self.orders.remove(old_id).ok_or_else(|| RegistryError::NotFound(old_id.clone()))?;

        // Server response wins on conflicts; fields the response did not
        // echo keep their draft values. form_errors are local-only and are
        // dropped on a successful create.
        let base = &mut server_record.base;
        base.product_id = base.product_id.take().or(draft.base.product_id);
        base.spec_sheet_id = base.spec_sheet_id.take().or(draft.base.spec_sheet_id);
        base.target_quantity = base.target_quantity.or(draft.base.target_quantity);
        base.start_date = base.start_date.or(draft.base.start_date);
        base.due_date = base.due_date.or(draft.base.due_date);
        base.registrant_id = base.registrant_id.take().or(draft.base.registrant_id);
        base.provider_id = base.provider_id.take().or(draft.base.provider_id);
        base.input_weight = base.input_weight.or(draft.base.input_weight);
        base.expected_weight = base.expected_weight.or(draft.base.expected_weight);
        if base.observations.is_empty() {
            base.observations = draft.base.observations;
        }
        if server_record.product_name.is_empty() {
            server_record.product_name = draft.product_name;
        }
        server_record.form_errors.clear();
        server_record.is_new_for_form = false;

        self.orders.insert(server_record.id.clone(), server_record);
        Ok(())
    }

    pub fn remove(&mut self, id: &OrderId) -> Option<OrderRecord> {
        self.orders.remove(id)
    }

    pub fn get(&self, id: &OrderId) -> Option<&OrderRecord> {
        self.orders.get(id)
    }

    pub fn get_mut(&mut self, id: &OrderId) -> Option<&mut OrderRecord> {
        self.orders.get_mut(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
