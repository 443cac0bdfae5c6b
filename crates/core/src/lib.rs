pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transcode;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::order::{
    BaseForm, FinalizationData, OrderId, OrderRecord, OrderStatus,
};
pub use domain::step::{Step, StepStatus};
pub use errors::{CoordinatorError, DomainError};
pub use lifecycle::{
    apply_event, assign_worker, complete_step, derive_active_step_index, start_step,
    LifecycleError, OrderEvent, TransitionOutcome,
};
pub use registry::{OrderRegistry, RegistryError};
pub use transcode::{
    from_remote, to_remote_payload, OrderPayload, RemoteOrder, RemoteStep, StepPayload,
};
