//! Sync executor.
//!
//! Executes create, sync and delete batches against the two remotes with
//! partial-failure semantics, capturing a rollback snapshot before any
//! remote write and auditing every change.

pub mod executor;
pub mod plan;
pub mod types;

pub use executor::{ExecuteRequest, execute};
pub use plan::{FieldChange, PlannedStep, Step};
pub use types::{
    DeleteScope, OperationKind, OperationStatus, OutcomeStatus, OutcomeSummary, SideResult,
    SyncOperation, SyncReport, TicketOutcome,
};
