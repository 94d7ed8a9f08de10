//! Test tree model built from the structural message.
//!
//! The first line printed by the JS runner describes the complete tree:
//!
//! ```json
//! {"type": "suite", "id": "suite0", "fullName": "", "description": "", "children": [
//!     {"type": "spec", "id": "spec0", "fullName": "adds", "description": "adds"}
//! ]}
//! ```
//!
//! [`parse`] turns it into [`JasmineItem`]s. [`parse_with`] lets callers plug
//! in their own node constructors through [`NodeFactory`], which is how the
//! harness builds its arena of runnable nodes from the same message.

use std::fmt::Write as _;

use serde_json::Value;
use thiserror::Error;

use crate::sync::{EventSource, ProtocolError, synchronize};
use crate::wire::{EventData, NodeKind};

/// Errors raised while decoding a structural message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField { field: &'static str, expected: &'static str },
}

/// Identity shared by specs and suites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeData {
    /// Opaque id, unique within one run
    pub id: String,
    /// Fully qualified display name (`fullName` on the wire)
    pub name: String,
    pub description: String,
}

impl NodeData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A jasmine spec.
#[derive(Debug, Clone)]
pub struct JasmineSpec {
    pub data: NodeData,
    /// Payload of the `specDone` event, set once the spec has been synchronized
    pub result: Option<EventData>,
}

/// A jasmine suite; `children` keep declaration order.
#[derive(Debug, Clone)]
pub struct JasmineSuite {
    pub data: NodeData,
    pub children: Vec<JasmineItem>,
    pub result: Option<EventData>,
}

/// A node of the reference tree.
///
/// Equality is deep and order sensitive, and ignores results: two trees are
/// equal when they describe the same specs and suites.
#[derive(Debug, Clone)]
pub enum JasmineItem {
    Spec(JasmineSpec),
    Suite(JasmineSuite),
}

impl PartialEq for JasmineItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JasmineItem::Spec(a), JasmineItem::Spec(b)) => a.data == b.data,
            (JasmineItem::Suite(a), JasmineItem::Suite(b)) => a.data == b.data && a.children == b.children,
            _ => false,
        }
    }
}

impl JasmineItem {
    pub fn spec(data: NodeData) -> Self {
        JasmineItem::Spec(JasmineSpec { data, result: None })
    }

    pub fn suite(children: Vec<JasmineItem>, data: NodeData) -> Self {
        JasmineItem::Suite(JasmineSuite {
            data,
            children,
            result: None,
        })
    }

    pub fn data(&self) -> &NodeData {
        match self {
            JasmineItem::Spec(spec) => &spec.data,
            JasmineItem::Suite(suite) => &suite.data,
        }
    }

    pub fn id(&self) -> &str {
        &self.data().id
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            JasmineItem::Spec(_) => NodeKind::Spec,
            JasmineItem::Suite(_) => NodeKind::Suite,
        }
    }

    /// Children of a suite; specs have none.
    pub fn children(&self) -> &[JasmineItem] {
        match self {
            JasmineItem::Spec(_) => &[],
            JasmineItem::Suite(suite) => &suite.children,
        }
    }

    pub fn result(&self) -> Option<&EventData> {
        match self {
            JasmineItem::Spec(spec) => spec.result.as_ref(),
            JasmineItem::Suite(suite) => suite.result.as_ref(),
        }
    }

    /// Consume this node's events, and those of all descendants, from `source`.
    ///
    /// Suites synchronize their children in declaration order inside their own
    /// start/done bracket. Results are stored on every node that completes.
    pub fn run<S>(&mut self, source: &mut S) -> Result<(), ProtocolError>
    where
        S: EventSource + ?Sized,
    {
        match self {
            JasmineItem::Spec(spec) => {
                let ((), data) = synchronize(source, NodeKind::Spec, &spec.data.id, |_| Ok::<_, ProtocolError>(()))?;
                spec.result = Some(data);
            }
            JasmineItem::Suite(suite) => {
                let children = &mut suite.children;
                let ((), data) = synchronize(source, NodeKind::Suite, &suite.data.id, |source| {
                    children.iter_mut().try_for_each(|child| child.run(&mut *source))
                })?;
                suite.result = Some(data);
            }
        }
        Ok(())
    }

    /// Indented one-line-per-node rendering, used by `jasmine-bridge tree`.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(&mut out, 0);
        out
    }

    fn write_outline(&self, out: &mut String, depth: usize) {
        let data = self.data();
        let _ = writeln!(out, "{}{} {}: {}", "  ".repeat(depth), self.kind(), data.id, data.description);
        for child in self.children() {
            child.write_outline(out, depth + 1);
        }
    }
}

/// Constructors used by [`parse_with`].
///
/// `A` carries extra arguments forwarded unchanged to every call at every depth.
pub trait NodeFactory<A: ?Sized = ()> {
    type Node;

    fn spec(&mut self, data: NodeData, extra: &A) -> Self::Node;

    /// Called after all children have been built, in declaration order.
    fn suite(&mut self, children: Vec<Self::Node>, data: NodeData, extra: &A) -> Self::Node;
}

/// Factory producing the reference [`JasmineItem`] tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct ItemFactory;

impl<A: ?Sized> NodeFactory<A> for ItemFactory {
    type Node = JasmineItem;

    fn spec(&mut self, data: NodeData, _extra: &A) -> JasmineItem {
        JasmineItem::spec(data)
    }

    fn suite(&mut self, children: Vec<JasmineItem>, data: NodeData, _extra: &A) -> JasmineItem {
        JasmineItem::suite(children, data)
    }
}

/// Parse a structural message into the reference tree.
pub fn parse(item: &Value) -> Result<JasmineItem, TreeError> {
    parse_with(item, &mut ItemFactory, &())
}

/// Parse a structural message using custom node constructors.
///
/// Required keys are looked up in the order `type`, `id`, `fullName`,
/// `description`, so a message missing any of them fails with
/// [`TreeError::MissingField`] before its type is checked. Suites additionally
/// require `children`.
pub fn parse_with<F, A>(item: &Value, factory: &mut F, extra: &A) -> Result<F::Node, TreeError>
where
    F: NodeFactory<A>,
    A: ?Sized,
{
    let item_type = string_field(item, "type")?;
    let data = NodeData {
        id: string_field(item, "id")?.to_string(),
        name: string_field(item, "fullName")?.to_string(),
        description: string_field(item, "description")?.to_string(),
    };

    match NodeKind::from_type(item_type) {
        Some(NodeKind::Spec) => Ok(factory.spec(data, extra)),
        Some(NodeKind::Suite) => {
            let children = field(item, "children")?
                .as_array()
                .ok_or(TreeError::InvalidField {
                    field: "children",
                    expected: "an array",
                })?
                .iter()
                .map(|child| parse_with(child, factory, extra))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(factory.suite(children, data, extra))
        }
        None => Err(TreeError::UnknownType(item_type.to_string())),
    }
}

fn field<'a>(item: &'a Value, key: &'static str) -> Result<&'a Value, TreeError> {
    item.get(key).ok_or(TreeError::MissingField(key))
}

fn string_field<'a>(item: &'a Value, key: &'static str) -> Result<&'a str, TreeError> {
    field(item, key)?.as_str().ok_or(TreeError::InvalidField {
        field: key,
        expected: "a string",
    })
}
