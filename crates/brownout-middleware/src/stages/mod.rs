//! Built-in middleware stages.
//!
//! 1. [`request_id`] - Generate/propagate the request ID
//! 2. [`load_shed`] - Shed requests while the system is overloaded
//!
//! Register them in this order so shed responses carry the request ID.

pub mod load_shed;
pub mod request_id;

// Re-export main types
pub use load_shed::{LoadShedBuilder, LoadShedMiddleware, ShedDecision};
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
