//! Data model types shared by the compiler and the runtime.
//!
//! Canonical string forms:
//! - Value types: `bool`, `u32`, `i32`, `txt`, `ipv4`, `ipv6`, `ipv4net`,
//!   `ipv6net`, `iprange`, `set_u32`, `set_txt`, `set_ipv4net`, `set_ipv6net`
//! - Prefix: `10.0.0.0/8`; address range: `10.0.0.1..10.0.0.9`
//! - Config node id: `"<unique> <position>"`

mod config_node_id;
mod direction;
mod net;
mod value;

pub use config_node_id::{ConfigNodeId, ConfigNodeIdMap};
pub use direction::Direction;
pub use net::{IpRange, Prefix};
pub use value::{Value, ValueType, ValueTypedLiteral, quote, unquote};
