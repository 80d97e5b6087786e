//! emud - emulation control daemon
//!
//! This crate provides the daemon's building blocks:
//! - `config` - layered configuration (defaults, config file, command line)
//! - `logging` - tracing subscriber setup from a logging config file
//! - `backend` - the emulation backend shared by every listener
//! - `dispatch` - request handling shared by the stream and datagram listeners
//! - `listener` - primary TCP, datagram UDP and HTTP control API listeners
//! - `lifecycle` - startup ordering, supervision and shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         emud                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ConfigResolver ──▶ logging::init ──▶ Daemon::start         │
//! │                                          │                  │
//! │        ┌─────────────────────────────────┼───────────┐      │
//! │        ▼                                 ▼           ▼      │
//! │  PrimaryListener ──derive_on──▶ DatagramListener  ControlApi│
//! │   (TCP, main task)             (UDP, background)  (HTTP)    │
//! │        │                                 │           │      │
//! │        └──────────────┬──────────────────┴───────────┘      │
//! │                       ▼                                     │
//! │            SharedBackend (BackendActor)                     │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate follows a panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod listener;
pub mod logging;
