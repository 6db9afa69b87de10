//! Lifecycle layer: document store and cross-document orchestration.
//!
//! The domain crates decide; this crate loads, persists, and coordinates.
//! Every multi-document operation is atomic against the store: either all
//! derived records are written or none are.

pub mod coordinator;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use coordinator::{CoordinatorError, FinalInvoiceOutcome, LifecycleCoordinator};
pub use store::{
    DocumentStore, DocumentStoreError, InMemoryDocumentStore, StoredEvent, StreamAppend,
    UncommittedEvent,
};
