//! Prompt relay worker binary internals: CLI surface, configuration, and
//! the file/HTTP implementations of the core trait seams.

pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod state;
pub mod upstream;
pub mod worker;
