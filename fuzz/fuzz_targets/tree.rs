#![no_main]

use jasmine_bridge::protocol::parse;
use jasmine_bridge::{NoopLifecycle, TestTree};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Only well-formed JSON reaches the tree parser
    if let Ok(message) = serde_json::from_slice::<serde_json::Value>(data) {
        let reference = parse(&message);
        let built = TestTree::build(&message, Arc::new(NoopLifecycle));
        match (reference, built) {
            (Ok(item), Ok(tree)) => assert_eq!(item, tree.to_item()),
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("parsers disagree"),
        }
    }
});
