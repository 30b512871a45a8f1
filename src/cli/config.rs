//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliUniformMask};
use crate::{
    config::{BackendType, MatteConfig, MatteConfigBuilder, UniformMaskPolicy},
    models::{ModelSource, ModelSpec},
};
use anyhow::{Context, Result};

/// Convert CLI arguments to a [`MatteConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration: `--config` file first, flags on top
    pub(crate) fn from_cli(cli: &Cli) -> Result<MatteConfig> {
        let base = match &cli.config {
            Some(path) => MatteConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => MatteConfig::default(),
        };
        let debug = base.debug || cli.verbose >= 2;
        let mut model = base.model.clone();
        let mut builder = MatteConfigBuilder::from(base);

        if let Some(provider) = &cli.execution_provider {
            let (backend, execution_provider) = BackendType::parse_provider_string(provider)
                .context("Invalid execution provider format")?;
            builder = builder.backend(backend).execution_provider(execution_provider);
        }

        if let Some(threads) = cli.threads {
            builder = builder.num_threads(threads);
        }

        if let Some(policy) = cli.uniform_mask {
            builder = builder.uniform_mask(policy.into());
        }

        if let Some(model_arg) = &cli.model {
            model = ModelSpec {
                source: ModelSource::parse(model_arg),
                sha256: None,
            };
        }
        if let Some(sha256) = &cli.sha256 {
            model.sha256 = Some(sha256.to_ascii_lowercase());
        }

        builder
            .model(model)
            .debug(debug)
            .build()
            .context("Invalid configuration")
    }

    /// Validate CLI arguments that do not depend on the configuration file
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(provider) = &cli.execution_provider {
            BackendType::parse_provider_string(provider)
                .context("Invalid execution provider format")?;
        }

        if cli.input.len() > 1 {
            if let Some(output) = &cli.output {
                if output.is_file() {
                    anyhow::bail!(
                        "Output path exists and is a file, not a directory: {}",
                        output.display()
                    );
                }
            }
        }

        Ok(())
    }
}

impl From<CliUniformMask> for UniformMaskPolicy {
    fn from(value: CliUniformMask) -> Self {
        match value {
            CliUniformMask::Opaque => Self::Opaque,
            CliUniformMask::Transparent => Self::Transparent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use std::path::PathBuf;

    fn create_test_cli() -> Cli {
        Cli {
            input: vec![PathBuf::from("test.jpg")],
            output: None,
            mask_only: false,
            silent: false,
            model: None,
            sha256: None,
            execution_provider: None,
            threads: None,
            uniform_mask: None,
            config: None,
            download_only: false,
            show_providers: false,
            recursive: false,
            pattern: None,
            verbose: 0,
        }
    }

    #[test]
    fn test_cli_defaults_match_library_defaults() {
        let config = CliConfigBuilder::from_cli(&create_test_cli()).unwrap();
        assert_eq!(config, MatteConfig::default());
    }

    #[test]
    fn test_cli_flags_override() {
        let mut cli = create_test_cli();
        cli.execution_provider = Some("tract:cpu".to_string());
        cli.threads = Some(8);
        cli.uniform_mask = Some(CliUniformMask::Transparent);
        cli.model = Some("https://example.com/models/DIS.onnx".to_string());
        cli.sha256 = Some("AB".repeat(32));
        cli.verbose = 2;

        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.backend, BackendType::Tract);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);
        assert_eq!(config.uniform_mask, UniformMaskPolicy::Transparent);
        assert_eq!(
            config.model.source,
            ModelSource::Url("https://example.com/models/DIS.onnx".to_string())
        );
        assert_eq!(config.model.sha256, Some("ab".repeat(32)));
        assert!(config.debug);
    }

    #[test]
    fn test_flags_layer_over_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("matte.json");
        std::fs::write(
            &path,
            r#"{ "uniform_mask": "transparent", "intra_threads": 2 }"#,
        )
        .unwrap();

        let mut cli = create_test_cli();
        cli.config = Some(path);
        cli.threads = Some(6);

        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.uniform_mask, UniformMaskPolicy::Transparent);
        assert_eq!(config.intra_threads, 6);
        assert_eq!(config.inter_threads, 3);
    }

    #[test]
    fn test_cli_validation() {
        let mut cli = create_test_cli();
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());

        cli.execution_provider = Some("invalid:provider".to_string());
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        cli.execution_provider = Some("tract:cuda".to_string());
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        let mut cli = create_test_cli();
        cli.sha256 = Some("not-a-hash".to_string());
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
