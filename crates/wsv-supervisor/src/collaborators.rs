//! Collaborators the supervisor consumes: argument construction and
//! executable/entry-point resolution.

use crate::config::{LaunchConfig, WorkerConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use wsv_common::{DEFAULT_HOST, DEFAULT_PORT};
use wsv_process::ProcessMatcher;

/// Turns a worker configuration into command-line arguments.
///
/// Implementations must be pure: same configuration, same arguments.
pub trait ArgumentBuilder: Send + Sync {
    fn build_arguments(&self, configuration: &WorkerConfig) -> Vec<String>;
}

/// Emits `--listen`/`--port` only when they differ from the worker's own
/// defaults, followed by any configured extra arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultArgumentBuilder;

impl ArgumentBuilder for DefaultArgumentBuilder {
    fn build_arguments(&self, configuration: &WorkerConfig) -> Vec<String> {
        let mut args = Vec::new();
        let network = &configuration.network;

        let listen = network.listen.trim();
        if !listen.is_empty() && listen != DEFAULT_HOST {
            args.push("--listen".to_string());
            args.push(listen.to_string());
        }

        if network.port != DEFAULT_PORT {
            args.push("--port".to_string());
            args.push(network.port.to_string());
        }

        args.extend(
            configuration
                .extra_args
                .iter()
                .filter(|a| !a.trim().is_empty())
                .cloned(),
        );
        args
    }
}

/// A launchable worker: interpreter, entry point and fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorker {
    pub executable: PathBuf,
    pub entry_point: Option<PathBuf>,
    /// Placed before the entry point
    pub interpreter_args: Vec<String>,
    /// Placed after the entry point
    pub entry_point_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

impl ResolvedWorker {
    /// A worker that is its own executable.
    pub fn executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            entry_point: None,
            interpreter_args: Vec::new(),
            entry_point_args: Vec::new(),
            environment: BTreeMap::new(),
        }
    }

    /// Fixed arguments: interpreter args, entry point, entry-point args.
    pub fn fixed_args(&self) -> Vec<String> {
        let mut args = self.interpreter_args.clone();
        if let Some(entry) = &self.entry_point {
            args.push(entry.to_string_lossy().into_owned());
        }
        args.extend(self.entry_point_args.iter().cloned());
        args
    }

    /// Matches processes started from this executable and entry point.
    pub fn matcher(&self) -> ProcessMatcher {
        let matcher = ProcessMatcher::new(&self.executable);
        match &self.entry_point {
            Some(entry) => matcher.with_argument(entry.to_string_lossy()),
            None => matcher,
        }
    }
}

/// Locates the worker under a root directory.
pub trait PathResolver: Send + Sync {
    /// `None` means the worker cannot be launched from `root`.
    fn resolve(&self, root: &Path) -> Option<ResolvedWorker>;
}

/// Directories commonly holding a bundled interpreter.
const COMMON_INTERPRETER_DIRS: &[&str] = &[
    "python_embeded",
    "python_embedded",
    "python",
    "python3",
    "python310",
    "python311",
    "python312",
    "python313",
];

/// Resolves an interpreter plus a script entry point.
#[derive(Debug, Clone, Default)]
pub struct ScriptPathResolver {
    config: LaunchConfig,
}

impl ScriptPathResolver {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    fn find_entry_point(&self, root: &Path) -> Option<PathBuf> {
        if let Some(nested) = &self.config.nested_directory {
            let candidate = root.join(nested).join(&self.config.entry_point);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let candidate = root.join(&self.config.entry_point);
        candidate.is_file().then_some(candidate)
    }

    fn find_interpreter(&self, root: &Path) -> PathBuf {
        let name = self.config.interpreter.as_str();

        if let Some(dir) = &self.config.interpreter_root {
            let dir = if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            };
            if let Some(found) = interpreter_in(&dir, name) {
                return found;
            }
            debug!(dir = %dir.display(), "Configured interpreter root has no interpreter");
        }

        for dir in COMMON_INTERPRETER_DIRS {
            if let Some(found) = interpreter_in(&root.join(dir), name) {
                return found;
            }
        }

        if let Ok(entries) = std::fs::read_dir(root) {
            let mut dirs: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            dirs.sort();
            for dir in dirs {
                if let Some(found) = interpreter_in(&dir, name) {
                    return found;
                }
            }
        }

        let at_root = root.join(name);
        if at_root.is_file() {
            return at_root;
        }

        // Left to PATH lookup
        PathBuf::from(name)
    }
}

fn interpreter_in(dir: &Path, name: &str) -> Option<PathBuf> {
    [dir.join(name), dir.join("bin").join(name)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

impl PathResolver for ScriptPathResolver {
    fn resolve(&self, root: &Path) -> Option<ResolvedWorker> {
        if root.as_os_str().is_empty() || !root.is_dir() {
            return None;
        }

        let entry_point = self.find_entry_point(root)?;
        let executable = self.find_interpreter(root);

        let mut environment = BTreeMap::new();
        environment.insert("PYTHONUTF8".to_string(), "1".to_string());
        environment.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());

        Some(ResolvedWorker {
            executable,
            entry_point: Some(entry_point),
            interpreter_args: self.config.interpreter_args.clone(),
            entry_point_args: self.config.entry_point_args.clone(),
            environment,
        })
    }
}
