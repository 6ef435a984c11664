//! Configuration for the dense mapping export.
//!
//! Settings start from [`ExportConfig::default`] and can be overridden from the process environment
//! with [`ExportConfig::from_env`], or set explicitly with the `with_*` builder methods.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the Connectome Workbench executable, looked up in `PATH` unless configured otherwise.
pub const DEFAULT_WB_COMMAND: &str = "wb_command";

pub const ENV_DEFAULT_IMAGE: &str = "GRAYORDINATES_DEFAULT_IMAGE";
pub const ENV_WB_COMMAND: &str = "GRAYORDINATES_WB_COMMAND";
pub const ENV_TIMEOUT_SECS: &str = "GRAYORDINATES_TIMEOUT_SECS";
pub const ENV_SCRATCH_DIR: &str = "GRAYORDINATES_SCRATCH_DIR";
pub const ENV_PARALLEL: &str = "GRAYORDINATES_PARALLEL";

/// What to do when the export command succeeds for a structure but reports no rows for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentStructurePolicy {
    /// The structure is reported as `None` in the [`crate::DenseMapping`].
    Allow,
    /// The export fails with [`crate::ExportFailure::EmptyOutput`].
    Reject,
}

impl Default for AbsentStructurePolicy {
    fn default() -> AbsentStructurePolicy {
        AbsentStructurePolicy::Allow
    }
}

/// Settings for [`crate::DenseMappingExporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Image used when `export` is called without one, typically a whole-brain `.dlabel.nii` file.
    pub default_image: Option<PathBuf>,
    pub wb_command: PathBuf,
    /// Upper bound for a single external command run. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Directory for the intermediate text files. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Run the three per-structure commands concurrently.
    pub parallel: bool,
    pub absent_policy: AbsentStructurePolicy,
}

impl Default for ExportConfig {
    fn default() -> ExportConfig {
        ExportConfig {
            default_image: None,
            wb_command: PathBuf::from(DEFAULT_WB_COMMAND),
            timeout: None,
            scratch_dir: None,
            parallel: true,
            absent_policy: AbsentStructurePolicy::default(),
        }
    }
}

impl ExportConfig {

    /// Default settings with environment overrides applied.
    ///
    /// Supported variables:
    /// - `GRAYORDINATES_DEFAULT_IMAGE` -> `default_image`
    /// - `GRAYORDINATES_WB_COMMAND` -> `wb_command`
    /// - `GRAYORDINATES_TIMEOUT_SECS` -> `timeout` (fractional seconds allowed, `0` disables)
    /// - `GRAYORDINATES_SCRATCH_DIR` -> `scratch_dir`
    /// - `GRAYORDINATES_PARALLEL` -> `parallel`
    pub fn from_env() -> ExportConfig {
        let mut config = ExportConfig::default();
        apply_environment_overrides(&mut config);
        config
    }

    pub fn with_default_image<P: AsRef<Path>>(mut self, image: P) -> ExportConfig {
        self.default_image = Some(image.as_ref().to_path_buf());
        self
    }

    pub fn with_wb_command<P: AsRef<Path>>(mut self, program: P) -> ExportConfig {
        self.wb_command = program.as_ref().to_path_buf();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ExportConfig {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_scratch_dir<P: AsRef<Path>>(mut self, dir: P) -> ExportConfig {
        self.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> ExportConfig {
        self.parallel = parallel;
        self
    }

    pub fn with_absent_policy(mut self, policy: AbsentStructurePolicy) -> ExportConfig {
        self.absent_policy = policy;
        self
    }

    /// The directory in which intermediate files are created.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Apply `GRAYORDINATES_*` environment variables to the given config. Unparsable values are ignored.
pub fn apply_environment_overrides(config: &mut ExportConfig) {
    if let Some(value) = env::var_os(ENV_DEFAULT_IMAGE) {
        config.default_image = Some(PathBuf::from(value));
    }
    if let Some(value) = env::var_os(ENV_WB_COMMAND) {
        config.wb_command = PathBuf::from(value);
    }
    if let Ok(value) = env::var(ENV_TIMEOUT_SECS) {
        match value.trim().parse::<f64>() {
            Ok(secs) if secs > 0.0 && secs.is_finite() => config.timeout = Some(Duration::from_secs_f64(secs)),
            Ok(secs) if secs == 0.0 => config.timeout = None,
            _ => log::warn!("Ignoring invalid {} value '{}'", ENV_TIMEOUT_SECS, value),
        }
    }
    if let Some(value) = env::var_os(ENV_SCRATCH_DIR) {
        config.scratch_dir = Some(PathBuf::from(value));
    }
    if let Ok(value) = env::var(ENV_PARALLEL) {
        let value = value.to_lowercase();
        config.parallel = value == "true" || value == "1" || value == "yes";
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn the_default_config_uses_wb_command_from_path() {
        let config = ExportConfig::default();
        assert_eq!(PathBuf::from("wb_command"), config.wb_command);
        assert_eq!(None, config.default_image);
        assert_eq!(None, config.timeout);
        assert!(config.parallel);
        assert_eq!(AbsentStructurePolicy::Allow, config.absent_policy);
        assert_eq!(env::temp_dir(), config.scratch_dir());
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = ExportConfig::default()
            .with_default_image("/data/parcels.dlabel.nii")
            .with_wb_command("/opt/workbench/bin/wb_command")
            .with_timeout(Duration::from_secs(30))
            .with_scratch_dir("/scratch")
            .with_parallel(false)
            .with_absent_policy(AbsentStructurePolicy::Reject);

        assert_eq!(Some(PathBuf::from("/data/parcels.dlabel.nii")), config.default_image);
        assert_eq!(PathBuf::from("/opt/workbench/bin/wb_command"), config.wb_command);
        assert_eq!(Some(Duration::from_secs(30)), config.timeout);
        assert_eq!(PathBuf::from("/scratch"), config.scratch_dir());
        assert!(!config.parallel);
        assert_eq!(AbsentStructurePolicy::Reject, config.absent_policy);
    }

    // All env var handling lives in one test, the process environment is shared between test threads.
    #[test]
    fn environment_overrides_are_applied() {
        env::set_var(ENV_DEFAULT_IMAGE, "/env/parcels.dlabel.nii");
        env::set_var(ENV_WB_COMMAND, "/env/wb_command");
        env::set_var(ENV_TIMEOUT_SECS, "2.5");
        env::set_var(ENV_SCRATCH_DIR, "/env/scratch");
        env::set_var(ENV_PARALLEL, "no");

        let config = ExportConfig::from_env();
        assert_eq!(Some(PathBuf::from("/env/parcels.dlabel.nii")), config.default_image);
        assert_eq!(PathBuf::from("/env/wb_command"), config.wb_command);
        assert_eq!(Some(Duration::from_millis(2500)), config.timeout);
        assert_eq!(PathBuf::from("/env/scratch"), config.scratch_dir());
        assert!(!config.parallel);

        env::set_var(ENV_TIMEOUT_SECS, "soon");
        let mut config = ExportConfig::default().with_timeout(Duration::from_secs(1));
        apply_environment_overrides(&mut config);
        assert_eq!(Some(Duration::from_secs(1)), config.timeout);

        for var in &[ENV_DEFAULT_IMAGE, ENV_WB_COMMAND, ENV_TIMEOUT_SECS, ENV_SCRATCH_DIR, ENV_PARALLEL] {
            env::remove_var(var);
        }
    }
}
