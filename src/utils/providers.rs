//! Backend and execution provider selection
//!
//! A selection is written `backend[:provider]`, e.g. `onnx:cuda` or `tract`.

use crate::{
    config::ExecutionProvider,
    error::{BgRemovalError, Result},
    processor::BackendType,
};
use std::fmt;
use std::str::FromStr;

/// Parsed `backend:provider` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSelection {
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
}

impl ProviderSelection {
    /// Selection with the backend's default provider
    #[must_use]
    pub fn for_backend(backend_type: BackendType) -> Self {
        let execution_provider = match backend_type {
            BackendType::Onnx => ExecutionProvider::Auto,
            BackendType::Tract => ExecutionProvider::Cpu,
        };
        Self {
            backend_type,
            execution_provider,
        }
    }
}

impl FromStr for ProviderSelection {
    type Err = BgRemovalError;

    /// # Examples
    /// ```rust
    /// use bgremove_service::{utils::ProviderSelection, BackendType, ExecutionProvider};
    ///
    /// let selection: ProviderSelection = "onnx:cuda".parse().unwrap();
    /// assert_eq!(selection.backend_type, BackendType::Onnx);
    /// assert_eq!(selection.execution_provider, ExecutionProvider::Cuda);
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let (backend, provider) = match normalized.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (normalized.as_str(), None),
        };

        let backend_type = match backend {
            "onnx" => BackendType::Onnx,
            "tract" => BackendType::Tract,
            other => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown backend '{other}'. Supported backends: onnx, tract"
                )))
            },
        };
        let Some(provider) = provider else {
            return Ok(Self::for_backend(backend_type));
        };

        let execution_provider = match (backend_type, provider) {
            (BackendType::Onnx, "auto") => ExecutionProvider::Auto,
            (_, "cpu") => ExecutionProvider::Cpu,
            (BackendType::Onnx, "cuda") => ExecutionProvider::Cuda,
            (BackendType::Onnx, "coreml") => ExecutionProvider::CoreMl,
            (BackendType::Onnx, other) => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown ONNX provider '{other}'. Supported: auto, cpu, cuda, coreml"
                )))
            },
            (BackendType::Tract, other) => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown Tract provider '{other}'. Tract only supports 'cpu'"
                )))
            },
        };
        Ok(Self {
            backend_type,
            execution_provider,
        })
    }
}

impl fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend_type, self.execution_provider)
    }
}

/// One selectable provider and whether this build and host can use it
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub selection: ProviderSelection,
    pub available: bool,
    pub description: String,
}

/// Every `backend:provider` combination with availability on this host
///
/// Backends compiled out are listed as unavailable.
#[must_use]
pub fn list_all_providers() -> Vec<ProviderInfo> {
    let mut providers = Vec::new();

    #[cfg(feature = "onnx")]
    let onnx: Vec<(String, bool, String)> = crate::backends::OnnxBackend::list_providers();
    #[cfg(not(feature = "onnx"))]
    let onnx: Vec<(String, bool, String)> = Vec::new();
    let onnx_available = |name: &str| {
        onnx.iter()
            .any(|(provider, available, _)| provider.eq_ignore_ascii_case(name) && *available)
    };

    for (provider, description) in [
        (ExecutionProvider::Auto, "ONNX Runtime with auto-selected provider"),
        (ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
        (ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
        (
            ExecutionProvider::CoreMl,
            "ONNX Runtime CoreML (Apple Silicon) acceleration",
        ),
    ] {
        let available = match provider {
            ExecutionProvider::Auto => !onnx.is_empty(),
            other => onnx_available(&other.to_string()),
        };
        providers.push(ProviderInfo {
            selection: ProviderSelection {
                backend_type: BackendType::Onnx,
                execution_provider: provider,
            },
            available,
            description: description.to_string(),
        });
    }

    #[cfg(feature = "tract")]
    let tract_available = crate::backends::TractBackend::list_providers()
        .iter()
        .any(|(_, available, _)| *available);
    #[cfg(not(feature = "tract"))]
    let tract_available = false;
    providers.push(ProviderInfo {
        selection: ProviderSelection::for_backend(BackendType::Tract),
        available: tract_available,
        description: "Pure Rust CPU inference via Tract".to_string(),
    });

    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<ProviderSelection> {
        s.parse()
    }

    #[test]
    fn test_parse_onnx_providers() {
        for (input, expected) in [
            ("onnx:auto", ExecutionProvider::Auto),
            ("onnx:cpu", ExecutionProvider::Cpu),
            ("onnx:cuda", ExecutionProvider::Cuda),
            ("ONNX:CoreML", ExecutionProvider::CoreMl),
        ] {
            let selection = parse(input).unwrap();
            assert_eq!(selection.backend_type, BackendType::Onnx);
            assert_eq!(selection.execution_provider, expected, "{input}");
        }
    }

    #[test]
    fn test_parse_backend_only_uses_defaults() {
        assert_eq!(
            parse("onnx").unwrap().execution_provider,
            ExecutionProvider::Auto
        );
        let tract = parse("tract").unwrap();
        assert_eq!(tract.backend_type, BackendType::Tract);
        assert_eq!(tract.execution_provider, ExecutionProvider::Cpu);
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "invalid", "onnx:tpu", "tract:cuda", "tract:auto", "mock:cpu"] {
            assert!(
                matches!(parse(input), Err(BgRemovalError::InvalidConfig(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["onnx:auto", "onnx:coreml", "tract:cpu"] {
            assert_eq!(parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn test_list_all_providers() {
        let providers = list_all_providers();
        let names: Vec<String> = providers.iter().map(|p| p.selection.to_string()).collect();
        assert!(names.contains(&"onnx:auto".to_string()));
        assert!(names.contains(&"tract:cpu".to_string()));
        assert_eq!(providers.len(), 5);
    }
}
