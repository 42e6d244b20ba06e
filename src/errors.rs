//! Error types for the wagering engines
//!
//! Every public engine call returns [`WagerResult`]. The categories mirror how a
//! failure is handled: validation and state-conflict errors never mutate state,
//! storage errors on synchronous paths are returned after the in-memory change
//! has been rolled back, and solver errors abort round creation.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum WagerError {
    /// Bad input from the caller
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Request does not fit the current round/order state
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Persistence layer failure on a synchronous path
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Flight duration could not be derived for a round
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// Invalid or unloadable settings
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("bet amount {amount} outside [{min}, {max}]")]
    InvalidAmount { amount: f64, min: f64, max: f64 },

    #[error("target {0} must be inside (0, 100)")]
    InvalidTarget(f64),

    #[error("direction must be 0 or 1, got {0}")]
    InvalidDirection(u8),

    #[error("position {0} is outside the board")]
    InvalidPosition(usize),

    #[error("mine count {0} must be within [1, 24]")]
    InvalidMineCount(u8),

    #[error("invalid ticket '{0}'")]
    InvalidTicket(String),

    #[error("escape height {height} must be in (1, {current}]")]
    InvalidEscapeHeight { height: f64, current: f64 },

    #[error("auto escape height {0} must be 0 or at least 1.01")]
    InvalidAutoEscape(f64),

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("preset number {0} is outside the room's number range")]
    InvalidNumber(i32),
}

/// State conflicts: wrong phase, duplicates, already-resolved orders
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    #[error("operation requires {expected}, round is {actual}")]
    WrongPhase { expected: &'static str, actual: String },

    #[error("order {0} already exists")]
    AlreadyExists(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("order {0} already settled")]
    AlreadySettled(String),

    #[error("order {0} already escaped")]
    AlreadyEscaped(String),

    #[error("order {0} already cancelled")]
    AlreadyCancelled(String),

    #[error("stale period: active is {active}, request was for {requested}")]
    StalePeriod { active: u64, requested: u64 },

    #[error("order limit of {limit} per period reached")]
    OrderLimit { limit: usize },

    #[error("wildcard limit of {limit} per period reached")]
    WildcardLimit { limit: usize },

    #[error("no active order for user {0}")]
    NoActiveOrder(String),

    #[error("user {0} already has an order in progress")]
    ActiveOrderExists(String),

    #[error("position {0} already opened")]
    PositionAlreadyOpened(usize),

    #[error("no position opened yet")]
    NothingOpened,

    #[error("room {0} not found")]
    RoomNotFound(u32),
}

/// Persistence errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Numeric solver errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("no convergence for target {target} after {iterations} iterations")]
    NoConvergence { target: f64, iterations: usize },

    #[error("zero derivative at x = {x}")]
    ZeroDerivative { x: f64 },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

pub type WagerResult<T> = Result<T, WagerError>;
pub type StorageResult<T> = Result<T, StorageError>;

impl WagerError {
    /// True for errors that did not touch engine state
    pub fn is_rejection(&self) -> bool {
        matches!(self, WagerError::Validation(_) | WagerError::Conflict(_))
    }
}
