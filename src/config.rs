// ==============================================================================
// config.rs - Analysis Configuration
// ==============================================================================
// Description: YAML configuration for aggregation and GCTA-COJO analysis
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Example:
//   finemapping_output_dir: /data/finemapping/220101
//   gcta:
//     binary: gcta64
//     reference_panel: /ref/ukb_v3_chr{chrom}.downsampled10k
//     temp_dir: /tmp/finemapping
//     timeout_secs: 3600
//   cojo:
//     maf: 0.01
//     p_threshold: 5.0e-8
//     window_kb: 500
//     collinear: 0.9
//   aggregation:
//     target_rows_per_partition: 100000
//     max_partitions: 200
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::conditional::{CojoParams, GctaCojo};
use crate::error::{FinemapError, Result};
use crate::executor::{CommandExecutor, ExecutionContext, OutputPolicy};
use crate::table::{LocalEngine, PartitionSettings};

/// External tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GctaSettings {
    pub binary: String,
    /// Arguments placed before the GCTA options (e.g. a container wrapper)
    pub binary_args: Vec<String>,
    /// PLINK bfile prefix template containing `{chrom}`
    pub reference_panel: String,
    pub temp_dir: PathBuf,
    pub timeout_secs: Option<u64>,
    /// Keep the tool's stdout/stderr for error reports
    pub capture_output: bool,
}

impl Default for GctaSettings {
    fn default() -> Self {
        Self {
            binary: "gcta64".to_string(),
            binary_args: Vec::new(),
            reference_panel: String::new(),
            temp_dir: std::env::temp_dir().join("finemapping"),
            timeout_secs: None,
            capture_output: true,
        }
    }
}

/// Top-level analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Root containing `output/` shards; `results/` is written beside it
    pub finemapping_output_dir: PathBuf,
    #[serde(default)]
    pub gcta: GctaSettings,
    #[serde(default)]
    pub cojo: CojoParams,
    #[serde(default)]
    pub aggregation: PartitionSettings,
}

impl AnalysisConfig {
    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| FinemapError::io(path, e))?;
        let config = Self::from_yaml(&raw)?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.finemapping_output_dir.as_os_str().is_empty() {
            return Err(FinemapError::config("finemapping_output_dir must be set"));
        }
        if self.gcta.binary.trim().is_empty() {
            return Err(FinemapError::config("gcta.binary must not be empty"));
        }
        if self.gcta.timeout_secs == Some(0) {
            return Err(FinemapError::config("gcta.timeout_secs must be positive"));
        }

        let cojo = &self.cojo;
        if !(0.0..0.5).contains(&cojo.maf) {
            return Err(FinemapError::config(format!(
                "cojo.maf must be in [0, 0.5), got {}",
                cojo.maf
            )));
        }
        if !(cojo.p_threshold > 0.0 && cojo.p_threshold <= 1.0) {
            return Err(FinemapError::config(format!(
                "cojo.p_threshold must be in (0, 1], got {}",
                cojo.p_threshold
            )));
        }
        if cojo.window_kb == 0 {
            return Err(FinemapError::config("cojo.window_kb must be positive"));
        }
        if !(cojo.collinear > 0.0 && cojo.collinear < 1.0) {
            return Err(FinemapError::config(format!(
                "cojo.collinear must be in (0, 1), got {}",
                cojo.collinear
            )));
        }

        let agg = &self.aggregation;
        if agg.target_rows_per_partition == 0 || agg.max_partitions == 0 || agg.sample_size == 0 {
            return Err(FinemapError::config(
                "aggregation settings must all be positive",
            ));
        }

        Ok(())
    }

    /// Reference panel template, required only for conditional analysis
    pub fn require_reference_panel(&self) -> Result<&str> {
        let panel = self.gcta.reference_panel.trim();
        if panel.is_empty() {
            return Err(FinemapError::config("gcta.reference_panel must be set"));
        }
        Ok(panel)
    }

    pub fn execution_context(&self) -> ExecutionContext {
        let output = if self.gcta.capture_output {
            OutputPolicy::Capture
        } else {
            OutputPolicy::Discard
        };
        let context = ExecutionContext::new(&self.gcta.temp_dir).with_output(output);
        match self.gcta.timeout_secs {
            Some(secs) => context.with_timeout(Duration::from_secs(secs)),
            None => context,
        }
    }

    /// GCTA-COJO driver bound to this configuration
    pub fn gcta_cojo<E: CommandExecutor>(&self, executor: E) -> Result<GctaCojo<E>> {
        let panel = self.require_reference_panel()?;
        Ok(GctaCojo::new(executor, &self.gcta.binary, panel, self.execution_context())
            .with_binary_args(self.gcta.binary_args.clone()))
    }

    pub fn table_engine(&self) -> LocalEngine {
        LocalEngine::new(self.aggregation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessExecutor;
    use tempfile::tempdir;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AnalysisConfig::from_yaml("finemapping_output_dir: /data/fm\n").unwrap();

        assert_eq!(config.finemapping_output_dir, PathBuf::from("/data/fm"));
        assert_eq!(config.gcta.binary, "gcta64");
        assert_eq!(config.cojo, CojoParams::default());
        assert_eq!(config.aggregation.max_partitions, 200);
        assert_eq!(config.execution_context().timeout, None);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
finemapping_output_dir: /data/fm
gcta:
  binary: /opt/gcta/gcta64
  reference_panel: /ref/chr{chrom}
  temp_dir: /scratch
  timeout_secs: 60
  capture_output: false
cojo:
  p_threshold: 1.0e-6
  window_kb: 1000
aggregation:
  target_rows_per_partition: 5000
"#;
        let config = AnalysisConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.cojo.p_threshold, 1e-6);
        assert_eq!(config.cojo.window_kb, 1000);
        assert_eq!(config.cojo.maf, 0.01);
        assert_eq!(config.aggregation.target_rows_per_partition, 5000);
        assert_eq!(config.aggregation.max_partitions, 200);

        let ctx = config.execution_context();
        assert_eq!(ctx.temp_dir, PathBuf::from("/scratch"));
        assert_eq!(ctx.timeout, Some(Duration::from_secs(60)));
        assert_eq!(ctx.output, OutputPolicy::Discard);

        let cojo = config.gcta_cojo(ProcessExecutor).unwrap();
        assert_eq!(cojo.reference_panel_for("22"), "/ref/chr22");
    }

    #[test]
    fn test_missing_output_dir_is_yaml_error() {
        let err = AnalysisConfig::from_yaml("gcta:\n  binary: gcta64\n").unwrap_err();
        assert!(matches!(err, FinemapError::Yaml(_)));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for yaml in [
            "finemapping_output_dir: /d\ncojo:\n  maf: 0.7\n",
            "finemapping_output_dir: /d\ncojo:\n  p_threshold: 0\n",
            "finemapping_output_dir: /d\ncojo:\n  collinear: 1.5\n",
            "finemapping_output_dir: /d\ncojo:\n  window_kb: 0\n",
            "finemapping_output_dir: /d\ngcta:\n  timeout_secs: 0\n",
            "finemapping_output_dir: /d\naggregation:\n  max_partitions: 0\n",
        ] {
            let err = AnalysisConfig::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, FinemapError::Config { .. }), "{yaml}: {err:?}");
        }
    }

    #[test]
    fn test_gcta_cojo_requires_reference_panel() {
        let config = AnalysisConfig::from_yaml("finemapping_output_dir: /d\n").unwrap();
        assert!(matches!(
            config.gcta_cojo(ProcessExecutor),
            Err(FinemapError::Config { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("analysis.config.yaml");
        std::fs::write(&path, "finemapping_output_dir: /data/fm\n").unwrap();

        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.finemapping_output_dir, PathBuf::from("/data/fm"));

        let missing = AnalysisConfig::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, FinemapError::Io { .. }));
    }
}
