//! Compilation and filtering directions.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::varrw::{VAR_FILTER_EX, VAR_FILTER_IM, VAR_FILTER_SM, VarId};

/// Where a compiled fragment runs.
///
/// `ExportSourceMatch` is the internal first half of export filtering: it
/// runs in the protocol a route comes from and tags the route; `Export`
/// runs in the protocol the route goes to and tests those tags.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Import,
    ExportSourceMatch,
    Export,
}

impl Direction {
    /// The per-route attribute slot that pins this direction's filter version.
    pub fn filter_slot(&self) -> VarId {
        match self {
            Direction::Import => VAR_FILTER_IM,
            Direction::ExportSourceMatch => VAR_FILTER_SM,
            Direction::Export => VAR_FILTER_EX,
        }
    }
}
