// ========================================================================================
//                                  Run configuration
// ========================================================================================

use serde::Deserialize;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::genotype::{DEFAULT_MAX_TOKEN_LEN, DecodeOptions, QualityPolicy};
use crate::panel::{EXPECTED_PANEL_SNPS, PANEL_FILE_NAME};
use crate::scorer::DEFAULT_MIN_ANCESTRY_SNPS;
use crate::types::ErrorCategory;

/// Environment variable naming an installation directory that holds the panel.
pub const GRAF_PATH_VAR: &str = "GRAFPATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("ancestry SNP panel {} not found; searched: {}", PANEL_FILE_NAME, format_paths(.searched))]
    PanelNotFound { searched: Vec<PathBuf> },
}

impl ConfigError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::Io,
            Self::Parse { .. } | Self::Invalid(_) | Self::PanelNotFound { .. } => {
                ErrorCategory::Configuration
            }
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every tunable of a run. All fields are optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Explicit panel file or directory holding it.
    pub panel: Option<PathBuf>,
    pub min_ancestry_snps: usize,
    pub threads: usize,
    pub expected_panel_snps: usize,
    pub max_token_len: usize,
    pub quality: QualityPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            panel: None,
            min_ancestry_snps: DEFAULT_MIN_ANCESTRY_SNPS,
            threads: num_cpus::get().max(1),
            expected_panel_snps: EXPECTED_PANEL_SNPS,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            quality: QualityPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        if self.expected_panel_snps == 0 {
            return Err(ConfigError::Invalid(
                "expected_panel_snps must be at least 1".to_string(),
            ));
        }
        if self.max_token_len < 16 {
            return Err(ConfigError::Invalid(format!(
                "max_token_len of {} bytes cannot hold a VCF field",
                self.max_token_len
            )));
        }
        Ok(())
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            policy: self.quality,
            max_token_len: self.max_token_len,
        }
    }
}

/// Finds the panel file: the configured path (a file, or a directory holding
/// `AncInferSNPs.txt`), else the standard search locations in order.
pub fn locate_panel_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let candidates = match explicit {
        Some(path) if path.is_dir() => vec![path.join(PANEL_FILE_NAME)],
        Some(path) => vec![path.to_path_buf()],
        None => panel_search_path(
            env::current_dir().ok(),
            env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            env::var_os(GRAF_PATH_VAR),
        ),
    };
    first_existing(candidates)
}

/// The search order when no panel path is configured: the working directory, the
/// executable's `data/` directory and the executable's directory, then the same two
/// under `$GRAFPATH`.
pub fn panel_search_path(
    cwd: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    graf_path: Option<OsString>,
) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    dirs.extend(cwd);
    if let Some(exe_dir) = exe_dir {
        dirs.push(exe_dir.join("data"));
        dirs.push(exe_dir);
    }
    if let Some(root) = graf_path.filter(|v| !v.is_empty()).map(PathBuf::from) {
        dirs.push(root.join("data"));
        dirs.push(root);
    }
    dirs.into_iter().map(|d| d.join(PANEL_FILE_NAME)).collect()
}

fn first_existing(candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    match candidates.iter().position(|p| p.is_file()) {
        Some(found) => Ok(candidates[found].clone()),
        None => Err(ConfigError::PanelNotFound {
            searched: candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RunConfig = toml::from_str("min_ancestry_snps = 250\n").unwrap();
        assert_eq!(config.min_ancestry_snps, 250);
        assert_eq!(config.expected_panel_snps, EXPECTED_PANEL_SNPS);
        assert_eq!(config.max_token_len, DEFAULT_MAX_TOKEN_LEN);
        assert!(config.threads >= 1);
        assert_eq!(config.quality, QualityPolicy::default());
    }

    #[test]
    fn quality_table_and_unknown_keys() {
        let config: RunConfig =
            toml::from_str("threads = 2\n[quality]\nstrict_duplicates = true\n").unwrap();
        assert!(config.quality.strict_duplicates);
        assert!(!config.quality.strict_allele_mismatch);
        assert_eq!(config.decode_options().policy, config.quality);

        assert!(toml::from_str::<RunConfig>("thread = 2\n").is_err());
    }

    #[test]
    fn load_validates_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grafpop.toml");
        fs::write(&path, "threads = 0\n").unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.category(), ErrorCategory::Configuration);

        fs::write(&path, "threads = [\n").unwrap();
        assert!(matches!(
            RunConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn search_path_order() {
        let order = panel_search_path(
            Some(PathBuf::from("/work")),
            Some(PathBuf::from("/opt/graf/bin")),
            Some(OsString::from("/opt/graf")),
        );
        let expected: Vec<PathBuf> = [
            "/work",
            "/opt/graf/bin/data",
            "/opt/graf/bin",
            "/opt/graf/data",
            "/opt/graf",
        ]
        .iter()
        .map(|d| Path::new(d).join(PANEL_FILE_NAME))
        .collect();
        assert_eq!(order, expected);

        assert_eq!(panel_search_path(None, None, Some(OsString::new())).len(), 0);
    }

    #[test]
    fn explicit_directory_or_file_is_used() {
        let dir = tempdir().unwrap();
        let panel = dir.path().join(PANEL_FILE_NAME);
        fs::write(&panel, "chr\n").unwrap();
        assert_eq!(locate_panel_file(Some(dir.path())).unwrap(), panel);
        assert_eq!(locate_panel_file(Some(&panel)).unwrap(), panel);

        let missing = dir.path().join("other.txt");
        match locate_panel_file(Some(&missing)) {
            Err(ConfigError::PanelNotFound { searched }) => assert_eq!(searched, vec![missing]),
            other => panic!("expected PanelNotFound, got {other:?}"),
        }
    }
}
