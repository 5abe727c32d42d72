//! Filter slots that pin the filter version a route first saw.
//!
//! Reconfiguration swaps the slot's current filter; routes already pinned
//! keep evaluating against the filter they hold a reference to until the
//! reference is dropped.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

use crate::error::PolicyError;
use crate::types::{Direction, Value};
use crate::varrw::{VarId, VarRW};

use super::exec::Outcome;
use super::filter::{FilterRef, FilterVersion, PolicyFilter};

/// When a route lets go of its pinned filter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PinRelease {
    /// The pin lives as long as the route's attributes.
    #[default]
    Persist,
    /// The pin is dropped once the pinned filter has run.
    ClearAfterEvaluation,
}

#[derive(Debug)]
pub struct VersionFilter {
    slot: VarId,
    current: RwLock<Arc<PolicyFilter>>,
    release: PinRelease,
}

impl VersionFilter {
    pub fn new(direction: Direction, release: PinRelease) -> Self {
        VersionFilter {
            slot: direction.filter_slot(),
            current: RwLock::new(Arc::new(PolicyFilter::empty(0))),
            release,
        }
    }

    pub fn slot(&self) -> VarId {
        self.slot
    }

    pub fn release(&self) -> PinRelease {
        self.release
    }

    /// Install a new program. Routes pinned to the previous one are not
    /// affected. The generation only advances when the program assembles.
    pub fn configure(&self, text: &str) -> Result<FilterVersion, PolicyError> {
        let mut current = self.current.write()?;
        let generation = current.version().generation + 1;
        let filter = Arc::new(PolicyFilter::configure(text, generation)?);
        let version = filter.version().clone();
        *current = filter;
        drop(current);
        info!(
            event = "Filter",
            phase = "Configure",
            slot = self.slot,
            version = %version
        );
        Ok(version)
    }

    /// Install the empty filter.
    pub fn reset(&self) -> Result<(), PolicyError> {
        let mut current = self.current.write()?;
        let generation = current.version().generation + 1;
        *current = Arc::new(PolicyFilter::empty(generation));
        drop(current);
        info!(event = "Filter", phase = "Reset", slot = self.slot);
        Ok(())
    }

    /// Poison the slot's lock so every later install fails.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = self.current.write();
                    panic!("poisoning filter slot {}", self.slot);
                })
                .join()
        });
    }

    pub fn current(&self) -> Result<Arc<PolicyFilter>, PolicyError> {
        Ok(self.current.read()?.clone())
    }

    /// Run the route through its pinned filter, pinning the current one
    /// first if the route holds none.
    ///
    /// # Panics
    /// If the route's slot holds anything but a filter reference.
    pub fn accept_route(&self, varrw: &mut dyn VarRW) -> Result<Outcome, PolicyError> {
        let pinned = match varrw.read(self.slot)? {
            Value::Filter(pinned) => pinned,
            other => panic!(
                "filter slot {} holds a {} value",
                self.slot,
                other.value_type()
            ),
        };
        let filter = match pinned.filter() {
            Some(filter) => filter.clone(),
            None => {
                let current = self.current()?;
                varrw.write(self.slot, Value::Filter(FilterRef::new(current.clone())))?;
                debug!(
                    event = "Filter",
                    phase = "Pin",
                    slot = self.slot,
                    version = %current.version()
                );
                current
            }
        };
        let outcome = filter.accept_route(varrw);
        if self.release == PinRelease::ClearAfterEvaluation {
            varrw.write(self.slot, Value::Filter(FilterRef::default()))?;
        }
        outcome
    }
}

/// The three filter slots of one protocol.
#[derive(Debug)]
pub struct VersionFilters {
    import: VersionFilter,
    source_match: VersionFilter,
    export: VersionFilter,
}

impl VersionFilters {
    pub fn new(release: PinRelease) -> Self {
        VersionFilters {
            import: VersionFilter::new(Direction::Import, release),
            source_match: VersionFilter::new(Direction::ExportSourceMatch, release),
            export: VersionFilter::new(Direction::Export, release),
        }
    }

    pub fn get(&self, direction: Direction) -> &VersionFilter {
        match direction {
            Direction::Import => &self.import,
            Direction::ExportSourceMatch => &self.source_match,
            Direction::Export => &self.export,
        }
    }
}

impl Default for VersionFilters {
    fn default() -> Self {
        VersionFilters::new(PinRelease::default())
    }
}
