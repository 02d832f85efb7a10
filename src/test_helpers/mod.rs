//! Shared test doubles and fixtures.

pub mod fixtures;
pub mod scripted;

pub use scripted::ScriptedTransport;
