//! Loading a jasmine test tree from a suite name.
//!
//! A suite name is a test directory optionally followed by options:
//!
//! ```text
//! spec|spec_regex=.*?_spec\.js;helpers=["helpers/*.js"];random=false
//! ```
//!
//! Option values are parsed as JSON and fall back to the raw string. The keys
//! `test_directory` and `spec_regex` are used by the loader; all others are
//! handed to jasmine's `loadConfig`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jasmine_protocol::{JasmineItem, TreeError, parse};
use miette::Diagnostic;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::harness::TestTree;
use crate::lifecycle::{Lifecycle, NoopLifecycle};
use crate::node::{CANDIDATES, NodeBinary, ProcessLauncher};
use crate::package_manager::{DependencyInstaller, PackageManagerRegistry};
use crate::runner::{ChannelError, EventChannel, RunnerOptions};

/// Spec files picked up when no `spec_regex` is given.
pub const DEFAULT_SPEC_REGEX: &str = r".*?spec\.js";

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("invalid option '{0}'")]
    #[diagnostic(
        code(jasmine_bridge::option),
        help("options follow the suite name as name|key=value;key=value")
    )]
    InvalidOption(String),

    #[error("option '{key}' must be a string, got {value}")]
    #[diagnostic(code(jasmine_bridge::option))]
    OptionType { key: &'static str, value: Value },

    #[error("invalid spec_regex '{pattern}'")]
    #[diagnostic(code(jasmine_bridge::spec_regex))]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid jasmine options: {0}")]
    #[diagnostic(code(jasmine_bridge::option))]
    RunnerOptions(#[source] serde_json::Error),

    #[error("failed to list spec files in {}", dir.display())]
    #[diagnostic(code(jasmine_bridge::discovery))]
    Discovery {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(jasmine_bridge::runner), help("check that node.js and the jasmine package are installed"))]
    Channel(#[from] ChannelError),

    #[error("invalid test tree from runner.js: {0}")]
    #[diagnostic(code(jasmine_bridge::tree))]
    Tree(#[from] TreeError),
}

/// Parse one `key=value` option.
pub fn parse_option(option: &str) -> Result<(String, Value), LoadError> {
    let (key, value) = option
        .trim()
        .split_once('=')
        .ok_or_else(|| LoadError::InvalidOption(option.to_string()))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Split a suite name into the name proper and its options.
pub fn parse_suite_name(name: &str) -> Result<(String, Map<String, Value>), LoadError> {
    let Some((name, options)) = name.split_once('|') else {
        return Ok((name.to_string(), Map::new()));
    };
    let options = options.split(';').map(parse_option).collect::<Result<Map<_, _>, _>>()?;
    Ok((name.to_string(), options))
}

fn compile_spec_regex(pattern: &str) -> Result<Regex, LoadError> {
    // Anchored at the start only: a prefix match of the file name
    Regex::new(&format!("^(?:{})", pattern)).map_err(|source| LoadError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn string_option(options: &mut Map<String, Value>, key: &'static str) -> Result<Option<String>, LoadError> {
    match options.remove(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(value) => Err(LoadError::OptionType { key, value }),
    }
}

/// Where to find spec files and how to run them.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Project directory handed to jasmine; spec files are listed from here
    pub test_directory: PathBuf,
    pub spec_regex: Regex,
    pub runner: RunnerOptions,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            test_directory: PathBuf::from("."),
            spec_regex: compile_spec_regex(DEFAULT_SPEC_REGEX).expect("INVARIANT: default spec regex compiles"),
            runner: RunnerOptions::default(),
        }
    }
}

impl LoaderConfig {
    pub fn from_suite_name(suite: &str) -> Result<Self, LoadError> {
        let (name, mut options) = parse_suite_name(suite)?;

        let test_directory = string_option(&mut options, "test_directory")?.unwrap_or(name);
        let spec_regex = match string_option(&mut options, "spec_regex")? {
            Some(pattern) => compile_spec_regex(&pattern)?,
            None => compile_spec_regex(DEFAULT_SPEC_REGEX)?,
        };
        if options.remove("lifecycle").is_some() {
            tracing::warn!("ignoring 'lifecycle' option; lifecycle providers are set on the loader");
        }
        let runner = RunnerOptions::from_map(options).map_err(LoadError::RunnerOptions)?;

        Ok(Self {
            test_directory: PathBuf::from(test_directory),
            spec_regex,
            runner,
        })
    }

    pub fn with_test_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.test_directory = dir.into();
        self
    }

    pub fn with_spec_regex(mut self, pattern: &str) -> Result<Self, LoadError> {
        self.spec_regex = compile_spec_regex(pattern)?;
        Ok(self)
    }

    pub fn with_runner_options(mut self, runner: RunnerOptions) -> Self {
        self.runner = runner;
        self
    }
}

/// File names in `dir` (not recursive) whose name matches `regex`, sorted.
pub fn discover_spec_files(dir: &Path, regex: &Regex) -> Result<Vec<PathBuf>, LoadError> {
    let discovery = |source| LoadError::Discovery {
        dir: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(discovery)? {
        let entry = entry.map_err(discovery)?;
        if entry.file_type().map_err(discovery)?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str() {
            Some(text) if regex.is_match(text) => files.push(PathBuf::from(text)),
            Some(_) => {}
            None => tracing::debug!(name = ?name, "skipping non UTF-8 file name"),
        }
    }
    files.sort();
    Ok(files)
}

/// Builds runnable test trees.
pub struct Loader {
    config: LoaderConfig,
    launcher: Option<Box<dyn ProcessLauncher>>,
    lifecycle: Arc<dyn Lifecycle>,
    installer: Arc<dyn DependencyInstaller>,
}

impl Loader {
    /// A loader running the first usable node binary, with no lifecycle hooks
    /// and the default package managers working in the current directory.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            launcher: None,
            lifecycle: Arc::new(NoopLifecycle),
            installer: Arc::new(PackageManagerRegistry::with_defaults(".")),
        }
    }

    pub fn from_suite_name(suite: &str) -> Result<Self, LoadError> {
        LoaderConfig::from_suite_name(suite).map(Self::new)
    }

    pub fn with_launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Some(Box::new(launcher));
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: impl Lifecycle + 'static) -> Self {
        self.lifecycle = Arc::new(lifecycle);
        self
    }

    pub fn with_installer(mut self, installer: impl DependencyInstaller + 'static) -> Self {
        self.installer = Arc::new(installer);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Discover the spec files and start the runner on them.
    pub fn open(&self) -> Result<EventChannel, LoadError> {
        let files = discover_spec_files(&self.config.test_directory, &self.config.spec_regex)?;
        tracing::debug!(count = files.len(), "discovered spec files");

        let located;
        let launcher: &dyn ProcessLauncher = match &self.launcher {
            Some(launcher) => launcher.as_ref(),
            None => {
                located = NodeBinary::locate().ok_or_else(|| ChannelError::NodeUnavailable {
                    tried: CANDIDATES.iter().map(|c| c.to_string()).collect(),
                })?;
                &located
            }
        };

        Ok(EventChannel::spawn(
            launcher,
            &self.config.test_directory,
            &files,
            &self.config.runner,
        )?)
    }

    /// Load the test tree, ready to run: lifecycle hooks are bound below the
    /// top-level suite, whose setup installs dependencies, and the event
    /// channel is anchored on it.
    #[tracing::instrument(skip_all, fields(test_directory = %self.config.test_directory.display()))]
    pub fn load(&self) -> Result<TestTree, LoadError> {
        let mut channel = self.open()?;
        let message = channel.read_tree()?;
        let mut tree = TestTree::build(&message, Arc::clone(&self.lifecycle))?;
        tree.bind_installer(Arc::clone(&self.installer));
        tree.set_channel(channel);
        tracing::info!(tests = tree.test_count(), "loaded test tree");
        Ok(tree)
    }

    /// Read the test tree only; the runner is stopped before any spec runs.
    pub fn read_tree(&self) -> Result<JasmineItem, LoadError> {
        let mut channel = self.open()?;
        let message = channel.read_tree()?;
        if let Err(error) = channel.close() {
            tracing::warn!(%error, "failed to stop runner.js");
        }
        Ok(parse(&message)?)
    }
}
