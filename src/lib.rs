//! Cnobi core library.
//!
//! Loads build manifests compiled from C into a Ninja-style dependency
//! graph, and speaks the GNU make jobserver protocol so a scheduler can
//! share job slots with a parent build.

pub mod cli;
pub mod eval;
pub mod graph;
pub mod jobserver;
pub mod loader;
pub mod manifest;
pub mod runner;
pub mod version;
