//! Engine configuration loaded from `config.toml`.
//!
//! ```toml
//! [ids]
//! legacy = false
//!
//! [codegen]
//! imports = ["import pandas as pd"]
//! comments = true
//!
//! [datetime]
//! formats = ["%Y-%m-%d", "%m/%d/%Y"]
//! ```

use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use stepsheet_engine::engine::{ConversionOptions, DEFAULT_DATETIME_FORMATS};

use crate::error::{Result, StepError};

const MAX_CONFIG_FILE_BYTES: u64 = 256 * 1024;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub ids: IdConfig,
    pub codegen: CodegenConfig,
    pub datetime: DatetimeConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IdConfig {
    /// Derive column ids from headers instead of handing out counters.
    pub legacy: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    /// Lines emitted at the top of a generated script.
    pub imports: Vec<String>,
    /// Prefix each chunk's code with a `# description` comment.
    pub comments: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            imports: vec![
                "import pandas as pd".to_string(),
                "from mitosheet.public.v3 import *".to_string(),
            ],
            comments: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatetimeConfig {
    /// Candidate formats tried when parsing strings as datetimes.
    pub formats: Vec<String>,
}

impl Default for DatetimeConfig {
    fn default() -> Self {
        DatetimeConfig {
            formats: DEFAULT_DATETIME_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StepError::Config(e.to_string()))
    }

    /// Load a config file, refusing files over the size cap.
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() > MAX_CONFIG_FILE_BYTES {
            return Err(StepError::Config(format!(
                "{} exceeds {} bytes",
                path.display(),
                MAX_CONFIG_FILE_BYTES
            )));
        }
        let mut content = String::new();
        file.take(MAX_CONFIG_FILE_BYTES).read_to_string(&mut content)?;
        Self::from_toml_str(&content)
    }

    /// `config.toml` in the platform config dir.
    pub fn user_config_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("", "", "stepsheet")?;
        let mut path = proj.config_dir().to_path_buf();
        path.push("config.toml");
        Some(path)
    }

    /// Load `path`, or the user config if `path` is `None`. A missing file
    /// yields the defaults silently; a broken one yields the defaults plus a
    /// warning.
    pub fn load_or_default(path: Option<&Path>) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::user_config_path(),
        };
        let Some(path) = path.filter(|p| p.exists()) else {
            return (EngineConfig::default(), warnings);
        };
        match Self::load(&path) {
            Ok(config) => (config, warnings),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                warnings.push(format!("Failed to load {}: {}", path.display(), e));
                (EngineConfig::default(), warnings)
            }
        }
    }

    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            datetime_formats: self.datetime.formats.clone(),
        }
    }
}
