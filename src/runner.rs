//! The channel to the JS runner process.
//!
//! `runner.js` is embedded in the binary and handed to node with `-e`. It
//! prints one JSON document per line: the test tree first, then the run
//! events. [`EventChannel`] reads those lines, skipping anything that is not a
//! JSON object, and hands them out either raw (as an iterator of values) or
//! decoded (as an [`EventSource`]).

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ExitStatus};

use jasmine_protocol::{EventSource, ProtocolError, RunEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::node::ProcessLauncher;

/// File name of the embedded runner, used in diagnostics.
pub const RUNNER_NAME: &str = "runner.js";

/// Source of the embedded runner.
pub const RUNNER_SCRIPT: &str = include_str!("runner.js");

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("node.js not found (tried {})", tried.join(", "))]
    NodeUnavailable { tried: Vec<String> },

    #[error("failed to launch runner.js: {0}")]
    Launch(#[source] io::Error),

    #[error("failed to encode runner options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("runner.js exited before printing the test tree")]
    MissingTree,

    #[error("the test tree has already been read")]
    TreeAlreadyRead,

    #[error("failed to read from runner.js: {0}")]
    Io(#[from] io::Error),
}

/// Options passed to jasmine's `loadConfig`.
///
/// Keys the bridge does not know about are passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOptions {
    /// Directory of the spec files, relative to the project directory
    #[serde(default = "default_spec_dir")]
    pub spec_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helpers: Vec<String>,
    /// Jasmine randomizes spec order unless told otherwise; events must follow
    /// declaration order.
    #[serde(default)]
    pub random: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_spec_dir() -> String {
    ".".to_string()
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            spec_dir: default_spec_dir(),
            helpers: Vec::new(),
            random: false,
            extra: Map::new(),
        }
    }
}

impl RunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from loose key/value pairs, such as those of a suite name.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map))
    }

    pub fn with_spec_dir(mut self, spec_dir: impl Into<String>) -> Self {
        self.spec_dir = spec_dir.into();
        self
    }

    pub fn with_helpers(mut self, helpers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.helpers = helpers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

struct RunnerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Line-oriented channel to a running `runner.js`.
pub struct EventChannel {
    reader: Box<dyn BufRead + Send>,
    process: Option<RunnerProcess>,
    tree_read: bool,
    finished: bool,
}

impl EventChannel {
    /// Read runner output from an arbitrary source.
    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            process: None,
            tree_read: false,
            finished: false,
        }
    }

    /// Launch the runner on `files`, paths relative to `project_dir` and the
    /// options' `spec_dir`.
    #[tracing::instrument(skip_all, fields(project_dir = %project_dir.display(), files = files.len()))]
    pub fn spawn(
        launcher: &dyn ProcessLauncher,
        project_dir: &Path,
        files: &[PathBuf],
        options: &RunnerOptions,
    ) -> Result<Self, ChannelError> {
        let project_dir = std::path::absolute(project_dir).map_err(ChannelError::Launch)?;
        let mut args: Vec<OsString> = vec![
            "-e".into(),
            RUNNER_SCRIPT.into(),
            project_dir.clone().into_os_string(),
            options.to_json()?.into(),
        ];
        args.extend(files.iter().map(|file| file.clone().into_os_string()));

        let mut child = launcher.launch(&args, &project_dir).map_err(ChannelError::Launch)?;
        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ChannelError::Launch(io::Error::other("runner stdout is not piped")));
        };
        tracing::debug!(pid = child.id(), "runner started");

        Ok(Self {
            reader: Box::new(BufReader::new(stdout)),
            process: Some(RunnerProcess { child, stdin }),
            tree_read: false,
            finished: false,
        })
    }

    /// The structural message; must be read once, before any event.
    pub fn read_tree(&mut self) -> Result<Value, ChannelError> {
        if self.tree_read {
            return Err(ChannelError::TreeAlreadyRead);
        }
        self.tree_read = true;
        self.next_value()?.ok_or(ChannelError::MissingTree)
    }

    /// Next JSON object printed by the runner; `None` at end of output.
    fn next_value(&mut self) -> io::Result<Option<Value>> {
        let mut line = Vec::new();
        while !self.finished {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                self.finished = true;
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(value @ Value::Object(_)) => return Ok(Some(value)),
                Ok(_) => tracing::warn!(line = text, "ignoring non-object output from {RUNNER_NAME}"),
                Err(error) => tracing::warn!(%error, line = text, "invalid output from {RUNNER_NAME}"),
            }
        }
        Ok(None)
    }

    /// Stop reading and release the runner.
    ///
    /// A runner that has not finished printing is killed. Returns its exit
    /// status, or `None` if there was no process or it was already closed.
    pub fn close(&mut self) -> io::Result<Option<ExitStatus>> {
        let unfinished = !self.finished;
        self.finished = true;
        self.reader = Box::new(io::empty());
        let Some(mut process) = self.process.take() else {
            return Ok(None);
        };
        drop(process.stdin.take());
        if unfinished {
            tracing::debug!("killing unfinished runner");
            if let Err(error) = process.child.kill() {
                tracing::debug!(%error, "runner already exited");
            }
        }
        let status = process.child.wait()?;
        tracing::debug!(%status, "runner exited");
        Ok(Some(status))
    }
}

impl Iterator for EventChannel {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.next_value() {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(%error, "failed to read from {RUNNER_NAME}");
                self.finished = true;
                None
            }
        }
    }
}

impl EventSource for EventChannel {
    fn next_event(&mut self) -> Result<Option<RunEvent>, ProtocolError> {
        if !self.tree_read {
            tracing::debug!("skipping unread test tree");
            match self.read_tree() {
                Ok(_) | Err(ChannelError::MissingTree) => {}
                Err(error) => return Err(ProtocolError::Stream(error.to_string())),
            }
        }
        let Some(value) = self.next_value().map_err(|e| ProtocolError::Stream(e.to_string()))? else {
            return Ok(None);
        };
        RunEvent::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "failed to reap {RUNNER_NAME}");
        }
    }
}
