//! Isolated config tree for engine tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tempfile::TempDir;
use walkdir::WalkDir;

use promconf::{
    ApplyMode, ControllerConfig, Engine, InstanceIdentity, ReloadError, ReloadReport, Reloader,
};

pub const INSTANCE_ID: &str = "0";
pub const INSTANCE_KEY: &str = "secret";

/// Counts reloads and optionally fails them.
#[derive(Debug, Default)]
pub struct RecordingReloader {
    calls: AtomicU32,
    fail: AtomicBool,
}

impl RecordingReloader {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with_status(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reloader for RecordingReloader {
    async fn reload(&self) -> Result<ReloadReport, ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReloadError::UnexpectedStatus {
                status: 500,
                body: "reload failed".to_string(),
            });
        }
        Ok(ReloadReport {
            attempts: 1,
            elapsed: Duration::ZERO,
        })
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub template_path: PathBuf,
    pub reloader: Arc<RecordingReloader>,
    pub engine: Arc<Engine>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_mode(ApplyMode::PerFragment)
    }

    pub fn with_mode(mode: ApplyMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config_dir = temp_dir.path().join("config");
        let template_path = temp_dir.path().join("template/prometheus.yml.tmpl");

        let config = ControllerConfig::new(
            &config_dir,
            &template_path,
            InstanceIdentity::new(
                INSTANCE_ID,
                Some(SecretString::from(INSTANCE_KEY.to_string())),
            ),
            "http://127.0.0.1:9090/-/reload",
        )
        .expect("valid test config")
        .with_apply_mode(mode);

        let reloader = Arc::new(RecordingReloader::default());
        let engine = Arc::new(Engine::new(config, reloader.clone()));

        Self {
            temp_dir,
            config_dir,
            template_path,
            reloader,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn reloads(&self) -> u32 {
        self.reloader.calls()
    }

    pub fn write_template(&self, content: &str) {
        std::fs::create_dir_all(self.template_path.parent().unwrap()).unwrap();
        std::fs::write(&self.template_path, content).unwrap();
    }

    pub fn template(&self) -> Option<String> {
        std::fs::read_to_string(&self.template_path).ok()
    }

    pub fn rule_files(&self) -> Vec<String> {
        self.file_names("rules")
    }

    pub fn job_files(&self) -> Vec<String> {
        self.file_names("jobs")
    }

    pub fn rule(&self, file: &str) -> String {
        std::fs::read_to_string(self.config_dir.join("rules").join(file)).unwrap()
    }

    pub fn job(&self, file: &str) -> String {
        std::fs::read_to_string(self.config_dir.join("jobs").join(file)).unwrap()
    }

    pub fn merged(&self) -> Option<String> {
        std::fs::read_to_string(self.config_dir.join("prometheus.yml")).ok()
    }

    /// Every regular file below the temporary root, relative and sorted.
    pub fn all_files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(self.root())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.sort();
        files
    }

    fn file_names(&self, directory: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.config_dir.join(directory)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
