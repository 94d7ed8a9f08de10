//! Tracebacks rebuilt from foreign stack traces.
//!
//! Jasmine reports each failed expectation with the V8 stack of the `expect`
//! call. Most of those frames belong to jasmine itself; only the span of user
//! frames between them is interesting:
//!
//! ```text
//! Error: Expected 2 to equal 1.
//!     at stack (.../jasmine-core/jasmine.js:1482:17)
//!     at func (/project/spec/math_spec.js:5:23)
//!     at Object.<anonymous> (/project/spec/math_spec.js:7:9)
//!     at attemptSync (.../jasmine-core/jasmine.js:1789:24)
//! ```
//!
//! [`Traceback::from_stack`] keeps that span and orders it the native way,
//! outermost call first.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// One `at name (path:line:column)` entry of a V8 stack.
static STACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)at\s+([a-zA-Z_][a-zA-Z0-9_.<>]*)\s+\((.*?):([0-9]+):([0-9]+)\)")
        .expect("INVARIANT: stack entry pattern is a valid regex")
});

/// Path fragments identifying frames of the JS runtime and of jasmine itself.
pub const INTERNAL_MARKERS: &[&str] = &["jasmine-core", "node_modules/jasmine/", "node:internal"];

/// Code identity of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub filename: String,
    pub name: String,
}

/// Minimal execution frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: Code,
    pub column: u32,
}

impl Frame {
    pub fn new(filename: impl Into<String>, name: impl Into<String>, column: u32) -> Self {
        Self {
            code: Code {
                filename: filename.into(),
                name: name.into(),
            },
            column,
        }
    }
}

/// Decides which frames belong to user code.
#[derive(Debug, Clone)]
pub struct StackFilter {
    markers: Vec<String>,
}

impl Default for StackFilter {
    fn default() -> Self {
        Self {
            markers: INTERNAL_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl StackFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat paths containing `marker` as internal as well.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    pub fn is_internal(&self, filename: &str) -> bool {
        self.markers.iter().any(|m| filename.contains(m.as_str()))
            || Path::new(filename).file_name().is_some_and(|name| name == "jasmine.js")
    }

    /// Reduce frames, innermost first as in the stack text, to the first
    /// contiguous span of user frames, ordered outermost first.
    pub fn user_frames(&self, frames: Vec<(Frame, u32)>) -> Vec<(Frame, u32)> {
        let mut span: Vec<(Frame, u32)> = frames
            .into_iter()
            .skip_while(|(frame, _)| self.is_internal(&frame.code.filename))
            .take_while(|(frame, _)| !self.is_internal(&frame.code.filename))
            .collect();
        span.reverse();
        span
    }
}

/// All `at` entries of a stack text with their line numbers, in text order.
pub fn parse_stack(stack: &str) -> Vec<(Frame, u32)> {
    stack
        .lines()
        .filter_map(|line| {
            let caps = STACK_RE.captures(line)?;
            let lineno = caps[3].parse().ok()?;
            let column = caps[4].parse().ok()?;
            Some((Frame::new(&caps[2], &caps[1], column), lineno))
        })
        .collect()
}

/// A linked chain of frames, outermost call first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceback {
    frame: Frame,
    lineno: u32,
    next: Option<Box<Traceback>>,
}

impl Traceback {
    /// Build a traceback from the user frames of a stack text.
    ///
    /// Returns `None` when no user frame is present.
    pub fn from_stack(stack: &str) -> Option<Self> {
        Self::from_stack_with(stack, &StackFilter::default())
    }

    pub fn from_stack_with(stack: &str, filter: &StackFilter) -> Option<Self> {
        Self::from_frames(filter.user_frames(parse_stack(stack)))
    }

    /// Chain `frames`, given outermost first.
    pub fn from_frames(frames: Vec<(Frame, u32)>) -> Option<Self> {
        frames.into_iter().rev().fold(None, |next, (frame, lineno)| {
            Some(Traceback {
                frame,
                lineno,
                next: next.map(Box::new),
            })
        })
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    /// The frame called from this one.
    pub fn next(&self) -> Option<&Traceback> {
        self.next.as_deref()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { current: Some(self) }
    }

    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// One entry per frame, with the source line when the file can be read.
    pub fn format_entries(&self) -> Vec<String> {
        self.iter()
            .map(|tb| {
                let code = &tb.frame.code;
                let mut entry = format!("  File \"{}\", line {}, in {}\n", code.filename, tb.lineno, code.name);
                if let Some(line) = source_line(&code.filename, tb.lineno) {
                    entry.push_str(&format!("    {}\n", line));
                }
                entry
            })
            .collect()
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Traceback (most recent call last):")?;
        for entry in self.format_entries() {
            f.write_str(&entry)?;
        }
        Ok(())
    }
}

pub struct Iter<'a> {
    current: Option<&'a Traceback>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Traceback;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next();
        Some(current)
    }
}

fn source_line(filename: &str, lineno: u32) -> Option<String> {
    let index = usize::try_from(lineno).ok()?.checked_sub(1)?;
    let source = fs::read_to_string(filename).ok()?;
    let line = source.lines().nth(index)?.trim();
    (!line.is_empty()).then(|| line.to_string())
}
