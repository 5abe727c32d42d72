//! Policy data model: policies, their ordered terms and the statement
//! blocks inside each term.

mod map;
mod statement;
mod term;

pub use map::PolicyMap;
pub use statement::PolicyStatement;
pub use term::{Block, Statement, Term};
