//! Wire-level conventions of the status feed
//!
//! Topic rules for the message bus and the structured status records carried
//! on the reserved status namespace.

pub mod status;
pub mod topics;

pub use status::*;
pub use topics::*;
