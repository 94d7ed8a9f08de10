//! Setup and teardown hooks around suites and specs.
//!
//! Hooks come from a [`Lifecycle`] provider, resolved once per run, and are
//! bound to every node when the tree is built. Implement the provider to start
//! and stop whatever the JS specs talk to (a web server under test, a
//! database, ...).

use std::fmt;
use std::sync::Arc;

use crate::harness::NodeRef;

/// Error returned by a hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub type HookResult = Result<(), HookError>;

/// Provider of the four lifecycle callbacks; every method defaults to a no-op.
pub trait Lifecycle: Send + Sync {
    /// Called before a suite's first child runs.
    fn suite_setup(&self, _suite: NodeRef<'_>) -> HookResult {
        Ok(())
    }

    /// Called after a suite's last child has run.
    fn suite_teardown(&self, _suite: NodeRef<'_>) -> HookResult {
        Ok(())
    }

    fn test_setup(&self, _test: NodeRef<'_>) -> HookResult {
        Ok(())
    }

    fn test_teardown(&self, _test: NodeRef<'_>) -> HookResult {
        Ok(())
    }
}

/// The default provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {}

pub type HookFn = Arc<dyn Fn(NodeRef<'_>) -> HookResult + Send + Sync>;

/// The setup/teardown pair owned by one node.
#[derive(Clone)]
pub struct Hooks {
    pub setup: HookFn,
    pub teardown: HookFn,
}

impl Hooks {
    pub fn new(setup: HookFn, teardown: HookFn) -> Self {
        Self { setup, teardown }
    }

    pub fn for_suite(lifecycle: &Arc<dyn Lifecycle>) -> Self {
        let setup = Arc::clone(lifecycle);
        let teardown = Arc::clone(lifecycle);
        Self::new(
            Arc::new(move |node: NodeRef<'_>| setup.suite_setup(node)),
            Arc::new(move |node: NodeRef<'_>| teardown.suite_teardown(node)),
        )
    }

    pub fn for_test(lifecycle: &Arc<dyn Lifecycle>) -> Self {
        let setup = Arc::clone(lifecycle);
        let teardown = Arc::clone(lifecycle);
        Self::new(
            Arc::new(move |node: NodeRef<'_>| setup.test_setup(node)),
            Arc::new(move |node: NodeRef<'_>| teardown.test_teardown(node)),
        )
    }
}

fn noop(_: NodeRef<'_>) -> HookResult {
    Ok(())
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new(Arc::new(noop), Arc::new(noop))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
