//! UpdateKit - Signed, delta-based, rollback-safe application updates
//!
//! The engine lives in [`engine::updater`]; [`engine::UpdateManager`] is the
//! entry point an application wires its transport, storage and installer into.

pub mod engine;
