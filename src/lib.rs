//! Emergency intake core.
//!
//! Turns a scanned member tag into a dispatched incident over two intake
//! surfaces: a conversational state machine on the messaging webhook, and
//! an encrypted one-shot assessment form. Both converge on the same
//! incident assembly and next-of-kin notification path.

pub mod channels;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod directory;
pub mod engine;
pub mod error;
pub mod flow;
pub mod inbound;
pub mod incident;
pub mod outbound;
pub mod prompts;
pub mod routes;
pub mod session;

pub use error::{Error, Result};
