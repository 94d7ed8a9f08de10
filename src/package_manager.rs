//! Installation of the JavaScript dependencies of the project under test.
//!
//! Package managers are tried in priority order, the most recently registered
//! first. A manager that fails (not applicable to the directory, binary
//! missing, install error) is logged and the next one is tried. A manager that
//! fails half way through an install is not rolled back.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("not a {manager} package directory: {}", dir.display())]
    NotAPackageDirectory { manager: &'static str, dir: PathBuf },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognised {command} version: {output}")]
    Version { command: String, output: String },

    #[error("{command} failed:\n{output}")]
    CommandFailed { command: String, output: String },

    #[error("no package manager available")]
    NoPackageManager,
}

/// Something that installs dependencies once before the first spec runs.
pub trait DependencyInstaller: Send + Sync {
    fn install(&self) -> Result<(), InstallError>;
}

/// A package manager able to install the dependencies of a directory.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that this manager applies to `dir` and is usable.
    fn detect(&self, dir: &Path) -> Result<(), InstallError>;

    fn install_dependencies(&self, dir: &Path) -> Result<(), InstallError>;
}

/// `npm`.
#[derive(Debug, Clone)]
pub struct Npm {
    command: String,
}

impl Npm {
    /// Files whose presence marks an npm package directory
    pub const DEPENDENCY_FILES: [&'static str; 2] = ["package.json", "npm-shrinkwrap.json"];

    pub fn new() -> Self {
        Self::with_command("npm")
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(&self, dir: &Path, arg: &str) -> Result<(bool, String), InstallError> {
        let output = Command::new(&self.command)
            .arg(arg)
            .current_dir(dir)
            .output()
            .map_err(|source| InstallError::Spawn {
                command: format!("{} {}", self.command, arg),
                source,
            })?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }
}

impl Default for Npm {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageManager for Npm {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn detect(&self, dir: &Path) -> Result<(), InstallError> {
        if !Self::DEPENDENCY_FILES.iter().any(|file| dir.join(file).is_file()) {
            tracing::warn!(dir = %dir.display(), "not an npm package directory");
            return Err(InstallError::NotAPackageDirectory {
                manager: self.name(),
                dir: dir.to_path_buf(),
            });
        }

        let (ok, output) = self.run(dir, "--version")?;
        let version = ok.then(|| parse_version(&output)).flatten().ok_or_else(|| InstallError::Version {
            command: self.command.clone(),
            output: output.trim().to_string(),
        })?;
        tracing::debug!(version = ?version, "using npm");
        Ok(())
    }

    fn install_dependencies(&self, dir: &Path) -> Result<(), InstallError> {
        tracing::info!(dir = %dir.display(), "installing dependencies");
        let (ok, output) = self.run(dir, "install")?;
        if ok {
            Ok(())
        } else {
            Err(InstallError::CommandFailed {
                command: format!("{} install", self.command),
                output,
            })
        }
    }
}

/// Parse a dotted numeric version such as `10.2.4`.
pub fn parse_version(text: &str) -> Option<Vec<u32>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.split('.').map(|part| part.parse().ok()).collect()
}

/// Ordered set of package managers sharing one project directory.
pub struct PackageManagerRegistry {
    dir: PathBuf,
    managers: Vec<Box<dyn PackageManager>>,
}

impl PackageManagerRegistry {
    /// An empty registry; installing with it always fails.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            managers: Vec::new(),
        }
    }

    /// A registry with every built-in manager.
    pub fn with_defaults(dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(dir);
        registry.register(Npm::new());
        registry
    }

    /// Register a manager ahead of all those registered before it.
    pub fn register(&mut self, manager: impl PackageManager + 'static) -> &mut Self {
        self.managers.insert(0, Box::new(manager));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.managers.iter().map(|m| m.name()).collect()
    }

    /// Install with the first manager that succeeds and return its name.
    pub fn install_dependencies(&self) -> Result<&'static str, InstallError> {
        for manager in &self.managers {
            let attempt = manager
                .detect(&self.dir)
                .and_then(|()| manager.install_dependencies(&self.dir));
            match attempt {
                Ok(()) => return Ok(manager.name()),
                Err(error) => tracing::error!(manager = manager.name(), %error, "package manager failed"),
            }
        }
        Err(InstallError::NoPackageManager)
    }
}

impl DependencyInstaller for PackageManagerRegistry {
    fn install(&self) -> Result<(), InstallError> {
        self.install_dependencies().map(|_| ())
    }
}
