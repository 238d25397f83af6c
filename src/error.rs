//! Error taxonomy for the DineTrack client core.
//!
//! Validation failures are raised before any network call and never reach the
//! Gateway. Network and Gateway failures are surfaced to the user and logged;
//! nothing is retried automatically.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::OrderStatus;

/// Client-side guard failures. None of these ever reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    UnknownOrder(String),

    #[error("Order must be completed before it can be paid")]
    OrderNotCompleted,

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("Amount received {tendered} is less than the order total {total}")]
    InsufficientTender { tendered: Decimal, total: Decimal },

    #[error("Stock cannot be negative")]
    NegativeStock,

    #[error("Stock {0} is too large")]
    StockOutOfRange(i64),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Missing required field: {0}")]
    EmptyField(&'static str),
}

#[derive(Debug, Error)]
pub enum DineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Fetch or connection failure; recovery is the next poll tick.
    #[error("{0}")]
    Network(String),

    /// Non-2xx response. `message` is the Gateway's own text, verbatim.
    #[error("{message}")]
    Gateway { status: u16, message: String },

    /// 401 from the Gateway. The session has already been torn down.
    #[error("Session expired, please sign in again")]
    Unauthorized,

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DineError::Validation(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DineError::Unauthorized)
    }
}

impl From<serde_json::Error> for DineError {
    fn from(err: serde_json::Error) -> Self {
        DineError::InvalidResponse(err.to_string())
    }
}

impl From<rusqlite::Error> for DineError {
    fn from(err: rusqlite::Error) -> Self {
        DineError::Storage(err.to_string())
    }
}

impl From<keyring::Error> for DineError {
    fn from(err: keyring::Error) -> Self {
        DineError::Storage(err.to_string())
    }
}

pub type DineResult<T> = Result<T, DineError>;
