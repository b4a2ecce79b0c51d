//! Worker-side plumbing for nodes that join a cluster.
//!
//! - [`MasterClient`]: connect, report status and progress, disconnect
//! - [`CallbackHandler`]: serves the callback port the master pushes tasks to
//!
//! Running the encoder itself is left to the embedding program, which reads
//! accepted [`TaskDefinition`](crate::scheduler::TaskDefinition)s from the
//! channel returned by [`CallbackHandler::new`].

pub mod callback;
pub mod client;

pub use callback::CallbackHandler;
pub use client::MasterClient;
