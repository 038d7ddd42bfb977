// Public API - engine, data types and report rendering
pub mod config;
pub mod error;
pub mod export;
pub mod ping;
pub mod state;

// Building blocks, public so the binary and integration tests can reach them
pub mod cli;
pub mod lookup;
pub mod probe;
