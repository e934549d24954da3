//! Layering of command line flags over file and environment configuration

use super::main_impl::{ModelArgs, RemoveArgs, ServeArgs};
use crate::{config::ServiceConfigBuilder, utils::ProviderSelection, ServiceConfig};
use anyhow::{Context, Result};

/// Build a `ServiceConfig` from defaults, `--config`, environment, then flags
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_serve_args(args: &ServeArgs) -> Result<ServiceConfig> {
        Self::from_serve_args_with(args, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_remove_args(args: &RemoveArgs) -> Result<ServiceConfig> {
        Self::base_builder(&args.model, |key| std::env::var(key).ok())?
            .build()
            .context("Invalid configuration")
    }

    fn from_serve_args_with<F>(args: &ServeArgs, env: F) -> Result<ServiceConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::base_builder(&args.model, env)?;
        if let Some(bind) = &args.bind {
            builder = builder.bind_address(bind.clone());
        }
        if let Some(origin) = &args.allowed_origin {
            builder = builder.allowed_origin(origin.clone());
        }
        if let Some(bytes) = args.max_body_bytes {
            builder = builder.max_body_bytes(bytes);
        }
        if args.stage_to_disk {
            builder = builder.stage_to_disk(true);
        }
        if let Some(dir) = &args.staging_dir {
            builder = builder.staging_dir(dir.clone());
        }
        builder.build().context("Invalid configuration")
    }

    fn base_builder<F>(args: &ModelArgs, env: F) -> Result<ServiceConfigBuilder>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &args.config {
            Some(path) => ServiceConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        config.apply_overrides_from(env);

        let mut builder = ServiceConfigBuilder::from_config(config);
        if let Some(model) = &args.model {
            builder = builder.model_path(model.clone());
        }
        if let Some(spec) = &args.execution_provider {
            let selection: ProviderSelection = spec
                .parse()
                .with_context(|| format!("Invalid execution provider '{spec}'"))?;
            builder = builder
                .backend_type(selection.backend_type)
                .execution_provider(selection.execution_provider);
        }
        if let Some(threads) = args.threads {
            builder = builder.num_threads(threads);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{processor::BackendType, ExecutionProvider};
    use std::path::PathBuf;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = ServeArgs {
            model: ModelArgs {
                model: Some(PathBuf::from("weights/seg.onnx")),
                execution_provider: Some("tract".to_string()),
                threads: Some(4),
                ..ModelArgs::default()
            },
            bind: Some("127.0.0.1:9000".to_string()),
            stage_to_disk: true,
            ..ServeArgs::default()
        };
        let config = CliConfigBuilder::from_serve_args_with(&args, no_env).unwrap();
        assert_eq!(config.model_path, PathBuf::from("weights/seg.onnx"));
        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert!(config.server.stage_to_disk);
    }

    #[test]
    fn test_flags_beat_environment() {
        let env = |key: &str| match key {
            crate::config::ENV_MODEL_PATH => Some("/env/model.onnx".to_string()),
            crate::config::ENV_BIND_ADDR => Some("127.0.0.1:7100".to_string()),
            _ => None,
        };
        let args = ServeArgs {
            bind: Some("127.0.0.1:7200".to_string()),
            ..ServeArgs::default()
        };
        let config = CliConfigBuilder::from_serve_args_with(&args, env).unwrap();
        assert_eq!(config.model_path, PathBuf::from("/env/model.onnx"));
        assert_eq!(config.server.bind_address, "127.0.0.1:7200");
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(
            &path,
            r#"{"model_path": "from-file.onnx", "server": {"bind_address": "127.0.0.1:7300"}}"#,
        )
        .unwrap();

        let args = ServeArgs {
            model: ModelArgs {
                config: Some(path),
                ..ModelArgs::default()
            },
            ..ServeArgs::default()
        };
        let config = CliConfigBuilder::from_serve_args_with(&args, no_env).unwrap();
        assert_eq!(config.model_path, PathBuf::from("from-file.onnx"));
        assert_eq!(config.server.bind_address, "127.0.0.1:7300");
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let args = ServeArgs {
            model: ModelArgs {
                execution_provider: Some("tract:cuda".to_string()),
                ..ModelArgs::default()
            },
            ..ServeArgs::default()
        };
        assert!(CliConfigBuilder::from_serve_args_with(&args, no_env).is_err());
    }
}
