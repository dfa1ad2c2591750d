// src/error.rs

use thiserror::Error;

use crate::model::{GroupId, UserId};

/// Errors surfaced by the enforcement engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A ban record carries an expiry but no violations. Only a counting bug
    /// can produce this, so it is reported instead of repaired.
    #[error("ban state of user {user} in group {group} has an expiry but zero violations")]
    InconsistentBanState { group: GroupId, user: UserId },

    /// A required snapshot (keywords, policy) could not be obtained.
    #[error("cannot evaluate message for group {group}: {reason}")]
    CannotEvaluate { group: GroupId, reason: String },

    #[error("invalid ban policy: {0}")]
    InvalidBanPolicy(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
