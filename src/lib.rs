//! Public API surface for the tmux-fleet-rs library.

/// Capture engine: one-shot, paged, bounded tail, and live streaming.
pub mod capture;
/// Configuration file, environment, and flag merging.
pub mod config;
/// Error types and Result alias for the library.
pub mod errors;
/// Multi-target fan-out with partial-failure aggregation.
pub mod fanout;
/// Window-layout capture/restore and named profiles.
pub mod layouts;
/// Session and audit log sinks.
pub mod logs;
/// Primitive tmux operations and list parsing.
pub mod ops;
/// Shell quoting and PATH composition.
pub mod quote;
/// Destructive-verb gate and audit enablement.
pub mod security;
/// State assembler for session snapshots.
pub mod snapshot;
/// Pane addressing, host profiles, and the default-target registry.
pub mod target;
/// Local and SSH subprocess transport.
pub mod transport;

#[cfg(test)]
mod test_support;
