//! # Native front end
//!
//! This module provides the boundary to the external compiler that lowers
//! C and Fortran sources into the textual IR dump. The rest of the pipeline
//! never sees native source text: a [`FrontEnd`] takes a source path and
//! returns the dump, or a [`Error::FrontEndFailure`] carrying the front
//! end's own diagnostics.
//!
//! [`GccFrontEnd`] shells out to a gcc-compatible driver. [`TextFrontEnd`]
//! serves pre-lowered dumps from memory and is what the tests and demos use;
//! it keeps the pipeline runnable on machines without a native toolchain.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Produces the lowered IR dump for one native source file
pub trait FrontEnd {
    /// Lower `source` and return the dump text
    fn lower(&self, source: &Path) -> Result<String>;
}

/// Front end backed by an external gcc-compatible driver
///
/// Invokes the driver once per source file with the dump flag set, then
/// reads the `.lower` dump the driver leaves in the work directory. The
/// object file itself is discarded; only the dump feeds the pipeline.
pub struct GccFrontEnd {
    /// Path to the driver executable
    driver_path: PathBuf,
    /// Directory receiving dumps and throwaway objects
    work_dir: PathBuf,
    /// Additional include directories, passed as `-I`
    include_dirs: Vec<PathBuf>,
    /// Whether the driver responded to `--version`
    available: bool,
}

impl GccFrontEnd {
    /// Create a front end over the given driver
    pub fn new(driver_path: Option<PathBuf>, work_dir: PathBuf) -> Self {
        let driver_path = driver_path.unwrap_or_else(|| PathBuf::from("gcc"));
        let available = Self::check_driver_available(&driver_path);
        Self {
            driver_path,
            work_dir,
            include_dirs: Vec::new(),
            available,
        }
    }

    /// Add an include directory
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Check if the driver is installed and responds
    fn check_driver_available(driver_path: &Path) -> bool {
        Command::new(driver_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether the driver was found at construction time
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Driver version line
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.driver_path)
            .arg("--version")
            .output()
            .map_err(|e| Error::FrontEndFailure {
                file: String::new(),
                reason: format!("failed to run driver: {}", e),
            })?;
        if !output.status.success() {
            return Err(Error::FrontEndFailure {
                file: String::new(),
                reason: "driver --version failed".to_string(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or("").to_string())
    }

    fn dump_path(&self, source: &Path) -> PathBuf {
        let mut name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".lower");
        self.work_dir.join(name)
    }
}

impl FrontEnd for GccFrontEnd {
    fn lower(&self, source: &Path) -> Result<String> {
        let file = source.display().to_string();
        if !self.available {
            return Err(Error::FrontEndFailure {
                file,
                reason: format!("driver '{}' not found", self.driver_path.display()),
            });
        }

        let object = self.work_dir.join("lower.o");
        let mut command = Command::new(&self.driver_path);
        command
            .arg("-c")
            .arg("-fdump-lowered")
            .arg(format!("-dumpdir={}", self.work_dir.display()))
            .arg("-o")
            .arg(&object);
        for dir in &self.include_dirs {
            command.arg("-I").arg(dir);
        }
        command.arg(source);

        debug!(source = %file, driver = %self.driver_path.display(), "lowering");
        let output = command.output().map_err(|e| Error::FrontEndFailure {
            file: file.clone(),
            reason: format!("failed to run driver: {}", e),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::FrontEndFailure {
                file,
                reason: stderr.trim().to_string(),
            });
        }

        let dump = self.dump_path(source);
        std::fs::read_to_string(&dump).map_err(|e| Error::FrontEndFailure {
            file,
            reason: format!("driver produced no dump at {}: {}", dump.display(), e),
        })
    }
}

/// Front end serving pre-lowered dumps from memory
#[derive(Default)]
pub struct TextFrontEnd {
    dumps: HashMap<PathBuf, String>,
}

impl TextFrontEnd {
    /// Create an empty front end
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the dump text for a source path
    pub fn insert(&mut self, source: impl Into<PathBuf>, dump: impl Into<String>) {
        self.dumps.insert(source.into(), dump.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, source: impl Into<PathBuf>, dump: impl Into<String>) -> Self {
        self.insert(source, dump);
        self
    }
}

impl FrontEnd for TextFrontEnd {
    fn lower(&self, source: &Path) -> Result<String> {
        self.dumps
            .get(source)
            .cloned()
            .ok_or_else(|| Error::FrontEndFailure {
                file: source.display().to_string(),
                reason: "no lowered dump registered for this path".to_string(),
            })
    }
}
