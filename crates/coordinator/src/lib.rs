//! Coordinator for the active production orders a client is working on.
//!
//! Composes the registry, lifecycle engine, and transcoder from
//! `prodflow-core` with a [`prodflow_remote::RemoteOrderService`] and a
//! navigable-location collaborator into the facade UI consumers use.

pub mod coordinator;
pub mod location;

pub use coordinator::{BaseFieldPatch, Coordinator, OrderSummary, StepDraft};
pub use location::{
    format_location, parse_location, LocationAction, LocationProvider, RecordingLocationProvider,
};
