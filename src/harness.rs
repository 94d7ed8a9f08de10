//! Native test adapter.
//!
//! The structural message is turned into a [`TestTree`]: a flat arena of
//! nodes where children are owned through index lists and parents are plain
//! back-references. Running the tree walks it depth first, synchronizing every
//! node below the top-level suite against the shared event stream, calling the
//! hooks bound to each node and reporting spec outcomes.
//!
//! The top-level suite never receives events or lifecycle hooks; its setup is
//! where dependency installation happens, once, before the first child runs.

use std::sync::Arc;
use std::time::Instant;

use jasmine_protocol::wire::status;
use jasmine_protocol::{
    EventData, EventSource, JasmineItem, NodeData, NodeFactory, NodeKind, ProtocolError, StreamFault, TreeError,
    expect_end, parse_with, synchronize,
};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::lifecycle::{HookError, HookFn, Hooks, Lifecycle};
use crate::package_manager::DependencyInstaller;
use crate::reporter::{AssertionFailure, TestInfo, TestReporter, TestSummary};
use crate::tb::Traceback;

/// Errors that abort a run.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    #[error(transparent)]
    #[diagnostic(
        code(jasmine_bridge::protocol),
        help("the runner reported events out of tree order; run with RUST_LOG=debug to see the stream")
    )]
    Protocol(#[from] ProtocolError),

    #[error("failed to prepare the test run: {0}")]
    #[diagnostic(code(jasmine_bridge::setup))]
    RootSetup(#[source] HookError),

    #[error("no event channel is anchored on the test tree")]
    #[diagnostic(code(jasmine_bridge::no_channel), help("a tree can only be run once"))]
    NoChannel,
}

impl StreamFault for RunError {
    fn breaks_stream(&self) -> bool {
        matches!(self, RunError::Protocol(_))
    }
}

/// Index of a node in its [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

struct TestNode {
    data: NodeData,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    hooks: Hooks,
    result: Option<EventData>,
}

/// Builds arena nodes bottom-up while the structural message is parsed.
#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<TestNode>,
}

impl TreeBuilder {
    fn push(&mut self, data: NodeData, kind: NodeKind, children: Vec<NodeId>, hooks: Hooks) -> NodeId {
        let id = NodeId(self.nodes.len());
        for child in &children {
            self.nodes[child.0].parent = Some(id);
        }
        self.nodes.push(TestNode {
            data,
            kind,
            parent: None,
            children,
            hooks,
            result: None,
        });
        id
    }
}

impl NodeFactory<Arc<dyn Lifecycle>> for TreeBuilder {
    type Node = NodeId;

    fn spec(&mut self, data: NodeData, lifecycle: &Arc<dyn Lifecycle>) -> NodeId {
        self.push(data, NodeKind::Spec, Vec::new(), Hooks::for_test(lifecycle))
    }

    fn suite(&mut self, children: Vec<NodeId>, data: NodeData, lifecycle: &Arc<dyn Lifecycle>) -> NodeId {
        self.push(data, NodeKind::Suite, children, Hooks::for_suite(lifecycle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Passed,
    Skipped,
    Failed,
    Error,
}

impl TestSummary {
    fn record(&mut self, verdict: Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::Skipped => self.skipped += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Error => self.errors += 1,
        }
    }
}

/// A runnable test hierarchy.
pub struct TestTree {
    nodes: Vec<TestNode>,
    root: NodeId,
    channel: Option<Box<dyn EventSource>>,
}

impl TestTree {
    /// Build the tree described by a structural message, binding the hooks of
    /// `lifecycle` to every node below the top-level suite.
    pub fn build(message: &Value, lifecycle: Arc<dyn Lifecycle>) -> Result<Self, TreeError> {
        let mut builder = TreeBuilder::default();
        let root = parse_with(message, &mut builder, &lifecycle)?;
        let mut nodes = builder.nodes;
        nodes[root.0].hooks = Hooks::default();
        Ok(Self {
            nodes,
            root,
            channel: None,
        })
    }

    /// Make `installer` the setup of the top-level suite.
    pub fn bind_installer(&mut self, installer: Arc<dyn DependencyInstaller>) {
        let setup: HookFn = Arc::new(move |_: NodeRef<'_>| installer.install().map_err(HookError::from));
        self.nodes[self.root.0].hooks.setup = setup;
    }

    /// Replace the hooks of one node, returning the previous ones.
    ///
    /// Returns `None`, and changes nothing, when `id` is not a node of this tree.
    pub fn set_hooks(&mut self, id: NodeId, hooks: Hooks) -> Option<Hooks> {
        let node = self.nodes.get_mut(id.0)?;
        Some(std::mem::replace(&mut node.hooks, hooks))
    }

    /// Anchor the event stream the tree will be run against.
    pub fn set_channel(&mut self, channel: impl EventSource + 'static) {
        self.channel = Some(Box::new(channel));
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.view(self.root)
    }

    /// The node `id`, or `None` when it is not a node of this tree.
    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id.0 < self.nodes.len()).then(|| self.view(id))
    }

    /// View of a node id handed out by this tree.
    fn view(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    /// Every node, in build order (children before their suite).
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef<'_>> {
        (0..self.nodes.len()).map(|index| self.view(NodeId(index)))
    }

    /// Look a node up by its jasmine id.
    pub fn find(&self, id: &str) -> Option<NodeRef<'_>> {
        self.nodes().find(|node| node.id() == id)
    }

    pub fn test_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.kind == NodeKind::Spec).count()
    }

    /// The reference tree with the same shape.
    pub fn to_item(&self) -> JasmineItem {
        self.item(self.root)
    }

    fn item(&self, id: NodeId) -> JasmineItem {
        let node = &self.nodes[id.0];
        match node.kind {
            NodeKind::Spec => JasmineItem::spec(node.data.clone()),
            NodeKind::Suite => JasmineItem::suite(
                node.children.iter().map(|&child| self.item(child)).collect(),
                node.data.clone(),
            ),
        }
    }

    /// Run against the anchored channel, consuming it.
    pub fn run(&mut self, reporter: &mut dyn TestReporter) -> Result<TestSummary, RunError> {
        let mut channel = self.channel.take().ok_or(RunError::NoChannel)?;
        self.run_with(&mut *channel, reporter)
    }

    /// Run against `source`.
    ///
    /// Spec failures are reported and the run continues; a protocol error or a
    /// failing top-level setup aborts it. The stream must end with the last
    /// node: a leftover event is a protocol error.
    #[tracing::instrument(skip_all, fields(tests = self.test_count()))]
    pub fn run_with<S>(&mut self, source: &mut S, reporter: &mut dyn TestReporter) -> Result<TestSummary, RunError>
    where
        S: EventSource + ?Sized,
    {
        let start = Instant::now();
        reporter.on_collection_complete(self.test_count());
        let mut summary = TestSummary::default();
        self.run_node(self.root, source, reporter, &mut summary)?;
        expect_end(source)?;
        summary.duration = start.elapsed();
        reporter.on_run_complete(&summary);
        Ok(summary)
    }

    fn run_node<S>(
        &mut self,
        id: NodeId,
        source: &mut S,
        reporter: &mut dyn TestReporter,
        summary: &mut TestSummary,
    ) -> Result<(), RunError>
    where
        S: EventSource + ?Sized,
    {
        match self.nodes[id.0].kind {
            NodeKind::Spec => self.run_spec(id, source, reporter, summary),
            NodeKind::Suite => self.run_suite(id, source, reporter, summary),
        }
    }

    fn run_spec<S>(
        &mut self,
        id: NodeId,
        source: &mut S,
        reporter: &mut dyn TestReporter,
        summary: &mut TestSummary,
    ) -> Result<(), RunError>
    where
        S: EventSource + ?Sized,
    {
        let info = self.view(id).test_info();
        let hooks = self.nodes[id.0].hooks.clone();
        tracing::debug!(test = %info.path, "running spec");
        reporter.on_test_start(&info);

        let setup = (hooks.setup)(self.view(id));
        let synced = synchronize(source, NodeKind::Spec, &self.nodes[id.0].data.id, |_| {
            Ok::<_, ProtocolError>(())
        });
        let teardown = (hooks.teardown)(self.view(id));
        let ((), data) = synced?;

        let mut verdict = match setup {
            Ok(()) => report_outcome(&info, &data, reporter),
            Err(error) => {
                reporter.on_error(&info, &format!("setup failed: {}", error));
                Verdict::Error
            }
        };
        if let Err(error) = teardown {
            reporter.on_error(&info, &format!("teardown failed: {}", error));
            verdict = Verdict::Error;
        }

        self.nodes[id.0].result = Some(data);
        reporter.on_test_stop(&info);
        summary.record(verdict);
        Ok(())
    }

    fn run_suite<S>(
        &mut self,
        id: NodeId,
        source: &mut S,
        reporter: &mut dyn TestReporter,
        summary: &mut TestSummary,
    ) -> Result<(), RunError>
    where
        S: EventSource + ?Sized,
    {
        let is_root = id == self.root;
        let hooks = self.nodes[id.0].hooks.clone();
        let children = self.nodes[id.0].children.clone();

        if let Err(error) = (hooks.setup)(self.view(id)) {
            if is_root {
                return Err(RunError::RootSetup(error));
            }
            // Children still run; their events are already on the stream
            self.report_suite_error(id, "setup", &error, reporter, summary);
        }

        let body = if is_root {
            children
                .iter()
                .try_for_each(|&child| self.run_node(child, source, reporter, summary))
                .map(|()| None)
        } else {
            let suite_id = self.nodes[id.0].data.id.clone();
            synchronize(source, NodeKind::Suite, &suite_id, |source| {
                children
                    .iter()
                    .try_for_each(|&child| self.run_node(child, &mut *source, &mut *reporter, &mut *summary))
            })
            .map(|((), data)| Some(data))
        };

        let teardown = (hooks.teardown)(self.view(id));
        let data = body?;
        if let Err(error) = teardown {
            self.report_suite_error(id, "teardown", &error, reporter, summary);
        }
        if let Some(data) = data {
            self.nodes[id.0].result = Some(data);
        }
        Ok(())
    }

    fn report_suite_error(
        &self,
        id: NodeId,
        stage: &str,
        error: &HookError,
        reporter: &mut dyn TestReporter,
        summary: &mut TestSummary,
    ) {
        let info = self.view(id).test_info();
        tracing::warn!(suite = %info.path, stage, %error, "suite hook failed");
        reporter.on_error(&info, &format!("suite {} failed: {}", stage, error));
        summary.record(Verdict::Error);
    }
}

/// Translate the done-event of a spec into reported outcomes.
fn report_outcome(info: &TestInfo, data: &EventData, reporter: &mut dyn TestReporter) -> Verdict {
    match data.status() {
        Some(status::PASSED) => {
            reporter.on_success(info);
            Verdict::Passed
        }
        Some(status::PENDING | status::EXCLUDED) => {
            reporter.on_skip(info, data.pending_reason.as_deref().unwrap_or_default());
            Verdict::Skipped
        }
        other if data.failed_expectations.is_empty() => {
            let status = other.unwrap_or("missing");
            reporter.on_error(info, &format!("spec finished with status '{}' and no failed expectations", status));
            Verdict::Error
        }
        _ => {
            for expectation in &data.failed_expectations {
                let failure = AssertionFailure {
                    message: expectation.message.clone(),
                    traceback: expectation.stack.as_deref().and_then(Traceback::from_stack),
                };
                reporter.on_failure(info, &failure);
            }
            Verdict::Failed
        }
    }
}

/// Borrowed view of one node, handed to hooks.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a TestTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a TestNode {
        &self.tree.nodes[self.id.0]
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// Jasmine's id.
    pub fn id(&self) -> &'a str {
        &self.node().data.id
    }

    pub fn name(&self) -> &'a str {
        &self.node().data.name
    }

    pub fn description(&self) -> &'a str {
        &self.node().data.description
    }

    pub fn kind(&self) -> NodeKind {
        self.node().kind
    }

    pub fn is_root(&self) -> bool {
        self.id == self.tree.root
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| self.tree.view(id))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.node().children.iter().map(move |&id| tree.view(id))
    }

    /// This node followed by its parent, grandparent and so on up to the top.
    pub fn ancestors(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::successors(Some(*self), |node| node.parent())
    }

    /// The top-level suite, where the event stream of the run is anchored.
    pub fn topsuite(&self) -> NodeRef<'a> {
        self.ancestors().last().unwrap_or(*self)
    }

    /// Payload of the done-event, once the node has been synchronized.
    pub fn result(&self) -> Option<&'a EventData> {
        self.node().result.as_ref()
    }

    /// Dotted ids from the outermost suite below the top-level one down to
    /// this node; the top-level suite itself is named by its id.
    pub fn display_name(&self) -> String {
        if self.is_root() {
            return self.id().to_string();
        }
        let mut ids: Vec<&str> = self.ancestors().filter(|node| !node.is_root()).map(|node| node.id()).collect();
        ids.reverse();
        ids.join(".")
    }

    pub fn test_info(&self) -> TestInfo {
        TestInfo {
            path: self.display_name(),
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}

impl std::fmt::Display for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use jasmine_protocol::{RunEvent, parse};
    use serde_json::json;

    use super::*;
    use crate::lifecycle::NoopLifecycle;

    fn message() -> Value {
        json!({
            "type": "suite", "id": "suite0", "fullName": "", "description": "",
            "children": [
                {
                    "type": "suite", "id": "suite1", "fullName": "Math", "description": "Math",
                    "children": [
                        {"type": "spec", "id": "spec0", "fullName": "Math adds", "description": "adds"}
                    ]
                },
                {"type": "spec", "id": "spec1", "fullName": "top", "description": "top"}
            ]
        })
    }

    fn tree() -> TestTree {
        TestTree::build(&message(), Arc::new(NoopLifecycle)).unwrap()
    }

    #[test]
    fn test_build_mirrors_message() {
        let tree = tree();
        assert_eq!(tree.to_item(), parse(&message()).unwrap());
        assert_eq!(tree.test_count(), 2);
        assert_eq!(tree.root().id(), "suite0");
        let children: Vec<&str> = tree.root().children().map(|c| c.id()).collect();
        assert_eq!(children, ["suite1", "spec1"]);
    }

    #[test]
    fn test_parent_links() {
        let tree = tree();
        let spec = tree.find("spec0").unwrap();
        assert_eq!(spec.parent().unwrap().id(), "suite1");
        assert_eq!(spec.topsuite().id(), "suite0");
        assert!(spec.topsuite().is_root());
        assert!(tree.root().parent().is_none());
        assert_eq!(tree.root().topsuite().id(), "suite0");
    }

    #[test]
    fn test_display_name_excludes_root() {
        let tree = tree();
        assert_eq!(tree.find("spec0").unwrap().display_name(), "suite1.spec0");
        assert_eq!(tree.find("spec1").unwrap().to_string(), "spec1");
        assert_eq!(tree.root().display_name(), "suite0");
    }

    #[test]
    fn test_build_rejects_bad_message() {
        let err = TestTree::build(&json!({"type": "test"}), Arc::new(NoopLifecycle)).err().unwrap();
        assert_eq!(err, TreeError::MissingField("id"));
    }

    #[test]
    fn test_foreign_node_id() {
        let mut tree = tree();
        let foreign = NodeId(tree.nodes.len());
        assert!(tree.node(foreign).is_none());
        assert!(tree.set_hooks(foreign, Hooks::default()).is_none());

        let spec = tree.find("spec0").unwrap().node_id();
        assert_eq!(tree.node(spec).unwrap().id(), "spec0");
        assert!(tree.set_hooks(spec, Hooks::default()).is_some());
    }

    #[test]
    fn test_run_without_channel() {
        struct Silent;
        impl TestReporter for Silent {
            fn on_test_start(&mut self, _: &TestInfo) {}
            fn on_success(&mut self, _: &TestInfo) {}
            fn on_skip(&mut self, _: &TestInfo, _: &str) {}
            fn on_failure(&mut self, _: &TestInfo, _: &AssertionFailure) {}
            fn on_error(&mut self, _: &TestInfo, _: &str) {}
            fn on_run_complete(&mut self, _: &TestSummary) {}
        }

        let mut tree = tree();
        tree.set_channel(VecDeque::<RunEvent>::new());
        // The anchored channel is consumed by the first run
        assert!(matches!(tree.run(&mut Silent), Err(RunError::Protocol(ProtocolError::UnexpectedEnd { .. }))));
        assert!(matches!(tree.run(&mut Silent), Err(RunError::NoChannel)));
    }
}
