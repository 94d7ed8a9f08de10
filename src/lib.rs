#![forbid(unsafe_code)]
//! jasmine-bridge
//!
//! Runs jasmine specs under node.js and reports them as native test cases.
//! The runner process prints the test tree and then one event per spec and
//! suite; the [`harness`] walks the tree in step with those events, calling
//! lifecycle hooks and turning failed expectations into assertion failures
//! with tracebacks pointing at the spec code.
//!
//! The process-independent parts (wire types, tree model, synchronizer) live
//! in the `jasmine_protocol` crate and are re-exported as [`protocol`].
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **True invariants**: If a panic represents a logic error, use `.expect("INVARIANT: reason")` with a clear
//!   explanation.

pub mod cli;
pub mod harness;
pub mod lifecycle;
pub mod loader;
pub mod node;
pub mod package_manager;
pub mod reporter;
pub mod runner;
pub mod tb;

pub use jasmine_protocol as protocol;

pub use harness::{NodeId, NodeRef, RunError, TestTree};
pub use lifecycle::{HookError, Hooks, Lifecycle, NoopLifecycle};
pub use loader::{LoadError, Loader, LoaderConfig};
pub use package_manager::{DependencyInstaller, InstallError, Npm, PackageManager, PackageManagerRegistry};
pub use reporter::{AssertionFailure, ConsoleReporter, TestInfo, TestReporter, TestSummary};
pub use runner::{ChannelError, EventChannel, RunnerOptions};
pub use tb::Traceback;
