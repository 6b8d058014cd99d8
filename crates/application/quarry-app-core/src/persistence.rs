use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use quarry_launch::{CensorFilter, Instance, LaunchProfile, LaunchTaskHandle};
use serde::{Deserialize, Serialize};

use crate::ports::InstanceRepo;

fn default_true() -> bool {
    true
}

fn default_max_lines() -> usize {
    quarry_config::DEFAULT_CONSOLE_MAX_LINES
}

/// Contents of `instances/<id>/instance.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub command: String,
    /// Relative paths are resolved against the instance directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub pre_launch_command: Option<String>,
    #[serde(default)]
    pub post_exit_command: Option<String>,
    #[serde(default)]
    pub launch_script: Option<String>,
    #[serde(default = "default_true")]
    pub show_console: bool,
    #[serde(default)]
    pub auto_close_console: bool,
    #[serde(default = "default_max_lines")]
    pub console_max_lines: usize,
    #[serde(default = "default_true")]
    pub stop_on_console_overflow: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Ordered `[secret, replacement]` pairs.
    #[serde(default)]
    pub censor: Vec<(String, String)>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: None,
            command: String::new(),
            working_dir: None,
            pre_launch_command: None,
            post_exit_command: None,
            launch_script: None,
            show_console: true,
            auto_close_console: false,
            console_max_lines: default_max_lines(),
            stop_on_console_overflow: true,
            variables: BTreeMap::new(),
            censor: Vec::new(),
        }
    }
}

/// An instance backed by a directory on disk.
pub struct FileInstance {
    id: String,
    dir: PathBuf,
    config: InstanceConfig,
    running: AtomicBool,
    crashed: AtomicBool,
    task: Mutex<Option<LaunchTaskHandle>>,
}

impl FileInstance {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>, config: InstanceConfig) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
            config,
            running: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Instance directory has no name")?;
        let path = dir.join(quarry_config::INSTANCE_CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: InstanceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::new(id, dir, config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    fn working_dir(&self) -> PathBuf {
        match &self.config.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.dir.join(dir),
            None => self.dir.clone(),
        }
    }
}

impl Instance for FileInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.id)
    }

    fn can_launch(&self) -> bool {
        !self.is_running() && !self.config.command.trim().is_empty()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn can_edit(&self) -> bool {
        !self.is_running()
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    fn set_crashed(&self, crashed: bool) {
        self.crashed.store(crashed, Ordering::SeqCst);
    }

    fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.config.variables.clone();
        vars.insert("INST_DIR".to_string(), self.dir.to_string_lossy().into_owned());
        vars
    }

    fn console_max_lines(&self) -> usize {
        self.config.console_max_lines
    }

    fn stop_on_console_overflow(&self) -> bool {
        self.config.stop_on_console_overflow
    }

    fn show_console(&self) -> bool {
        self.config.show_console
    }

    fn auto_close_console(&self) -> bool {
        self.config.auto_close_console
    }

    fn launch_profile(&self) -> LaunchProfile {
        LaunchProfile {
            command: self.config.command.clone(),
            working_dir: self.working_dir(),
            pre_launch_command: self.config.pre_launch_command.clone(),
            post_exit_command: self.config.post_exit_command.clone(),
            launch_script: self.config.launch_script.clone(),
            censor: self.config.censor.iter().cloned().collect::<CensorFilter>(),
        }
    }

    fn launch_task(&self) -> Option<LaunchTaskHandle> {
        self.task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_launch_task(&self, task: Option<LaunchTaskHandle>) {
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = task;
    }
}

/// Scans `<data>/instances/*/instance.json`.
pub struct InstanceList {
    root: PathBuf,
}

impl InstanceList {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(quarry_config::INSTANCES_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_instances(&self) -> Result<Vec<Arc<FileInstance>>> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .with_context(|| format!("Failed to create {}", self.root.display()))?;
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join(quarry_config::INSTANCE_CONFIG_FILE).is_file())
            .collect();
        dirs.sort();

        let mut instances = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match FileInstance::load(&dir) {
                Ok(instance) => instances.push(Arc::new(instance)),
                Err(e) => tracing::warn!("skipping instance at {}: {e:#}", dir.display()),
            }
        }
        tracing::debug!(count = instances.len(), root = %self.root.display(), "loaded instances");
        Ok(instances)
    }
}

impl InstanceRepo for InstanceList {
    fn load(&self) -> Result<Vec<Arc<dyn Instance>>> {
        Ok(self
            .load_instances()?
            .into_iter()
            .map(|i| i as Arc<dyn Instance>)
            .collect())
    }
}
