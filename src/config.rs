//! Run configuration, read from a TOML file.
use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::compute::{AuxVarNames, DEFAULT_AVEDIM};
use crate::error::PpError;
use crate::io::archive::{DiskExtraction, ExtractionMode, ExtractionStrategy, InMemoryExtraction};
use crate::naming::{DEFAULT_FILE_KIND, DEFAULT_FILE_PREFIX};

/// Settings shared by every product of a run. Every field has a default, so
/// a configuration file only needs the ones that differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpConfig {
    /// Directory holding the `YYYY0101.nc.tar` history archives
    pub history_dir: PathBuf,
    /// Root of the post-processed tree; must already exist
    pub pp_dir: PathBuf,
    /// Extension of the files inside the archives, e.g. "nc" or "tile1.nc"
    pub file_kind: String,
    /// Prefix of the file names inside the archives
    pub file_prefix: String,
    /// Name of the time dimension
    pub time_dim: String,
    /// Fill value for floating point data variables that lack one
    pub fill_value: f64,
    /// Chunk size per dimension in the output files
    pub chunks: IndexMap<String, usize>,
    pub extraction: ExtractionConfig,
    /// Names of the interval bookkeeping variables
    pub aux: AuxVarNames,
}

impl Default for PpConfig {
    fn default() -> Self {
        Self {
            history_dir: PathBuf::from("history"),
            pp_dir: PathBuf::from("pp"),
            file_kind: DEFAULT_FILE_KIND.to_string(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            time_dim: DEFAULT_AVEDIM.to_string(),
            fill_value: 1.0e20,
            chunks: IndexMap::new(),
            extraction: ExtractionConfig::default(),
            aux: AuxVarNames::default(),
        }
    }
}

/// How history files are taken out of their archives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    /// Where files are unpacked in "disk" mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl ExtractionConfig {
    /// The extraction strategy this configuration describes.
    ///
    /// "disk" mode requires `scratch_dir`.
    pub fn strategy(&self) -> error_stack::Result<Box<dyn ExtractionStrategy>, PpError> {
        match self.mode {
            ExtractionMode::Memory => Ok(Box::new(InMemoryExtraction)),
            ExtractionMode::Disk => {
                let scratch_dir = self.scratch_dir.as_ref().ok_or_else(|| {
                    PpError::invalid_argument("extraction mode 'disk' needs a scratch_dir")
                })?;
                Ok(Box::new(DiskExtraction::new(scratch_dir)))
            }
        }
    }
}

impl PpConfig {
    pub fn from_toml_str(s: &str) -> error_stack::Result<Self, PpError> {
        toml::from_str(s).change_context_lazy(|| PpError::context("Could not parse configuration"))
    }

    pub fn from_toml_file(path: &Path) -> error_stack::Result<Self, PpError> {
        if !path.is_file() {
            error_stack::bail!(PpError::MissingPath(path.to_path_buf()));
        }
        let s = std::fs::read_to_string(path).change_context_lazy(|| {
            PpError::context(format!("Could not read configuration file {}", path.display()))
        })?;
        let cfg = Self::from_toml_str(&s).attach_printable_lazy(|| format!("In file {}", path.display()))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// An example configuration, used by the `config-template` subcommand.
    pub fn template_example() -> Self {
        let mut chunks = IndexMap::new();
        chunks.insert("time".to_string(), 1);
        chunks.insert("z_l".to_string(), 35);
        Self {
            history_dir: PathBuf::from("CM4_piControl/ncrc4.intel18/history"),
            pp_dir: PathBuf::from("CM4_piControl/ncrc4.intel18/pp"),
            chunks,
            extraction: ExtractionConfig {
                mode: ExtractionMode::Disk,
                scratch_dir: Some(PathBuf::from("/tmp/freedompp")),
            },
            ..Default::default()
        }
    }

    /// Write [`PpConfig::template_example`] to `path`, with comments.
    pub fn write_template(path: &Path) -> error_stack::Result<(), PpError> {
        let comments = [
            "Example freedompp configuration. Every setting is optional; the values",
            "shown are the defaults except for the directories, chunks and extraction.",
            "",
            "history_dir holds the YYYY0101.nc.tar archives, pp_dir is the root of the",
            "post-processed tree and must already exist.",
            "file_kind is the end of the file names inside the archives, e.g. \"tile1.nc\".",
            "chunks gives the chunk size along each dimension of the output files.",
            "extraction.mode is \"memory\" to read archive members into memory, or \"disk\"",
            "to unpack them into extraction.scratch_dir, where they are reused next time.",
            "The [aux] table names the variables recording each time step's averaging interval.",
        ];
        let template = Self::template_example();
        let mut f = std::fs::File::create(path).change_context_lazy(|| {
            PpError::context(format!("Could not create template file {}", path.display()))
        })?;

        for line in comments {
            writeln!(f, "# {line}").change_context_lazy(|| {
                PpError::context(format!("Error writing to template file: {}", path.display()))
            })?;
        }
        let s = toml::to_string_pretty(&template)
            .change_context_lazy(|| PpError::context("Could not serialize the example configuration"))?;
        write!(f, "{s}").change_context_lazy(|| {
            PpError::context(format!("Error writing to template file: {}", path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty() {
        let cfg = PpConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PpConfig::default());
        assert_eq!(cfg.file_prefix, "./");
        assert_eq!(cfg.aux.duration, "average_DT");
        assert_eq!(cfg.time_dim, "time");
    }

    #[test]
    fn test_partial_config() {
        let cfg = PpConfig::from_toml_str(
            r#"
            pp_dir = "/archive/pp"
            file_kind = "tile1.nc"

            [chunks]
            time = 1
            xh = 360

            [extraction]
            mode = "disk"
            scratch_dir = "/tmp/scratch"

            [aux]
            bounds = "time_bounds"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pp_dir, PathBuf::from("/archive/pp"));
        assert_eq!(cfg.file_kind, "tile1.nc");
        assert_eq!(cfg.chunks.keys().collect::<Vec<_>>(), ["time", "xh"]);
        assert_eq!(cfg.extraction.mode, ExtractionMode::Disk);
        assert_eq!(cfg.aux.bounds, "time_bounds");
        assert_eq!(cfg.aux.start, "average_T1");
        assert!(cfg.extraction.strategy().is_ok());
    }

    #[test]
    fn test_disk_needs_scratch_dir() {
        let cfg = PpConfig::from_toml_str("[extraction]\nmode = \"disk\"\n").unwrap();
        let err = cfg.extraction.strategy().err().unwrap();
        assert!(matches!(err.current_context(), PpError::InvalidArgument(_)));
        assert!(PpConfig::from_toml_str("[extraction]\nmode = \"tape\"\n").is_err());
    }

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freedompp.toml");
        PpConfig::write_template(&path).unwrap();
        let cfg = PpConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg, PpConfig::template_example());
    }

    #[test]
    fn test_missing_file() {
        let err = PpConfig::from_toml_file(Path::new("/no/such/freedompp.toml")).unwrap_err();
        assert!(matches!(err.current_context(), PpError::MissingPath(_)));
    }
}
