//! Runtime side: assembling program text and running it against routes.
//!
//! A protocol owns one [`VersionFilters`]; the engine installs compiled
//! program text into its slots with [`VersionFilter::configure`] and route
//! evaluators call [`VersionFilter::accept_route`] concurrently.

pub mod assembler;
pub mod exec;
mod filter;
pub mod instr;
mod version_filter;

pub use assembler::assemble;
pub use exec::{Executor, Outcome};
pub use filter::{FilterRef, FilterVersion, PolicyFilter};
pub use instr::{FilterProgram, Instr};
pub use version_filter::{PinRelease, VersionFilter, VersionFilters};
