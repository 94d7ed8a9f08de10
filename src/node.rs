//! Locating and launching node.js.
//!
//! Some distributions ship an unrelated `node` binary (the amateur packet radio
//! daemon), so every candidate is probed by evaluating a script that prints a
//! marker before it is trusted.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Binary names tried, in order.
pub const CANDIDATES: [&str; 2] = ["node", "nodejs"];

const MARKER: &str = "jasmine_bridge::node";

/// Starts the runner process.
///
/// The child must have piped stdin and stdout; stderr is left to the caller's
/// terminal.
pub trait ProcessLauncher {
    fn launch(&self, args: &[OsString], cwd: &Path) -> io::Result<Child>;
}

/// A node.js executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBinary {
    program: OsString,
}

impl NodeBinary {
    /// Use `program` without probing it.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The first of [`CANDIDATES`] that is really node.js.
    pub fn locate() -> Option<Self> {
        Self::locate_in(&CANDIDATES)
    }

    pub fn locate_in(candidates: &[&str]) -> Option<Self> {
        candidates.iter().map(|name| Self::new(*name)).find(|binary| binary.probe())
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    fn probe(&self) -> bool {
        let script = format!("console.log({:?})", MARKER);
        match Command::new(&self.program)
            .arg("--eval")
            .arg(script)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => {
                let found = output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == MARKER;
                tracing::debug!(program = ?self.program, found, "probed node candidate");
                found
            }
            Err(error) => {
                tracing::debug!(program = ?self.program, %error, "node candidate not runnable");
                false
            }
        }
    }
}

impl ProcessLauncher for NodeBinary {
    fn launch(&self, args: &[OsString], cwd: &Path) -> io::Result<Child> {
        Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}
