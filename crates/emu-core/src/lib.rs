//! emu-core - Shared domain types for the emulation control daemon
//!
//! This crate provides the types shared between the daemon (`emud`),
//! its wire protocol (`emu-protocol`) and clients.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod node;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use node::{LinkSpec, Node, NodeId, NodeKind, NodeSpec};
pub use session::{Session, SessionId, SessionState, SessionView};
