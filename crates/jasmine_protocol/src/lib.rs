//! Process-independent core of jasmine-bridge.
//!
//! The JS runner speaks a line-oriented protocol: the first line describes the
//! whole test tree, every following line is one lifecycle event. This crate
//! holds the types for both, the tree parser, and the synchronizer that walks
//! a tree against the event stream while enforcing its order.
//!
//! Nothing in here spawns processes; event producers plug in through
//! [`EventSource`].

pub mod sync;
pub mod tree;
pub mod wire;

pub use sync::{EventSource, ProtocolError, StreamFault, SyncScope, expect_end, synchronize};
pub use tree::{JasmineItem, JasmineSpec, JasmineSuite, NodeData, NodeFactory, TreeError, parse, parse_with};
pub use wire::{EventData, FailedExpectation, NodeKind, RunEvent};
