//! Declarative command-line interfaces and a cached workflow engine.
//!
//! External tools are described by [`spec::InterfaceSpec`] documents: typed
//! inputs with argv templates, and outputs resolved after the run. Interfaces
//! become workflow [`node`]s; a [`workflow::Workflow`] wires node outputs to
//! inputs and the [`engine`] runs it, reusing results whose inputs hash the
//! same as last time.
//!
//! - **[`core`]**: Pure, deterministic logic (validation, argv assembly,
//!   hashing, graph expansion). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, caches, definition and
//!   config files). Isolated behind [`io::executor::CommandRunner`] so tests
//!   never spawn real tools.
//!
//! Orchestration modules ([`interface`], [`node`], [`workflow`], [`engine`])
//! combine the two.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod interface;
pub mod io;
pub mod logging;
pub mod node;
pub mod spec;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod value;
pub mod workflow;
