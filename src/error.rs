use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::backend::PolicyFilter;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PolicyError {
    #[error("parse error at line {line}: {message}")]
    ParseError { line: u32, message: String },

    #[error("dependency error at line {line}: {message}")]
    DependencyError { line: u32, message: String },

    #[error("semantic error at line {line}: {message}")]
    SemanticError { line: u32, message: String },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("varmap error: {0}")]
    VarMapError(String),

    #[error("invalid value: {0}")]
    ValueError(String),

    #[error("assemble error at line {line}: {message}")]
    AssembleError { line: u32, message: String },

    #[error("evaluation error: {0}")]
    EvalError(String),

    #[error("Poisoned lock error: {0}")]
    PoisonedLockError(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl PolicyError {
    pub fn semantic(line: u32, message: impl Into<String>) -> Self {
        PolicyError::SemanticError {
            line,
            message: message.into(),
        }
    }

    pub fn dependency(line: u32, message: impl Into<String>) -> Self {
        PolicyError::DependencyError {
            line,
            message: message.into(),
        }
    }

    /// Attach a source line to errors raised below the AST, where no line is known.
    ///
    /// Value and varmap errors surfacing during a check become semantic errors.
    pub fn at_line(self, line: u32) -> Self {
        match self {
            PolicyError::SemanticError { line: 0, message } => {
                PolicyError::SemanticError { line, message }
            }
            PolicyError::DependencyError { line: 0, message } => {
                PolicyError::DependencyError { line, message }
            }
            PolicyError::ValueError(message)
            | PolicyError::VarMapError(message)
            | PolicyError::EvalError(message) => PolicyError::SemanticError { line, message },
            other => other,
        }
    }

    /// Source line carried by the error, if any.
    pub fn line(&self) -> Option<u32> {
        match self {
            PolicyError::ParseError { line, .. }
            | PolicyError::DependencyError { line, .. }
            | PolicyError::SemanticError { line, .. }
            | PolicyError::AssembleError { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl From<std::sync::PoisonError<RwLockReadGuard<'_, Arc<PolicyFilter>>>> for PolicyError {
    fn from(err: PoisonError<RwLockReadGuard<'_, Arc<PolicyFilter>>>) -> Self {
        PolicyError::PoisonedLockError(err.to_string())
    }
}

impl From<std::sync::PoisonError<RwLockWriteGuard<'_, Arc<PolicyFilter>>>> for PolicyError {
    fn from(err: PoisonError<RwLockWriteGuard<'_, Arc<PolicyFilter>>>) -> Self {
        PolicyError::PoisonedLockError(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}

impl From<regex::Error> for PolicyError {
    fn from(err: regex::Error) -> Self {
        PolicyError::ValueError(format!("invalid regex: {err}"))
    }
}
