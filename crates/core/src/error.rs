//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// illegal transitions, one-shot conversion conflicts). Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed line quantities/prices).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An illegal document status change was requested.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The quote has already been converted into an order.
    #[error("quote has already been converted to an order")]
    AlreadyConverted,

    /// The order already has a final invoice.
    #[error("order already has a final invoice")]
    AlreadyInvoiced,

    /// An order with a final invoice cannot be cancelled, only credited.
    #[error("order has a final invoice and cannot be cancelled")]
    HasFinalInvoice,

    /// Deposits against an order may never exceed the order total.
    #[error("deposit total would exceed order total")]
    DepositExceedsTotal,

    /// Credit note amount must be positive and at most the parent invoice total.
    #[error("credit amount out of range")]
    CreditAmountOutOfRange,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested document was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
