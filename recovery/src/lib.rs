//! Build-and-recovery orchestrator for generated source trees.
//!
//! A request hands over a [`core::types::SourceTree`]; the orchestrator
//! compiles it, classifies compiler diagnostics, and runs a cascade of repair
//! strategies until the build succeeds or the attempt budget is spent. The
//! crate keeps a strict split:
//!
//! - **[`core`]**: Pure logic (classification, fingerprints, budgets, session
//!   state). No I/O.
//! - **[`io`]**: Compiler and fix-service processes, scratch directories,
//!   build logs, and configuration.
//! - **[`strategies`]**: The repair cascade, from deterministic rewrites to the
//!   last-resort fallback tree.
//!
//! [`controller::Orchestrator`] ties them together into one recovery session.
//!
//! A service embedding the orchestrator calls [`logging::init`] once at
//! startup, unless it installs its own `tracing` subscriber.

pub mod controller;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategies;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
