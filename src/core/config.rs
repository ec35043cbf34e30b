//! Configuration surface for the triage pipeline.
//!
//! Configuration is read once at startup from the environment. It covers the
//! storage root for generated attribution overlays, the directory holding the
//! two model weight files, and the compute device. Database settings used by
//! the surrounding service layer are not part of the core.

use crate::core::errors::{TriageError, TriageResult};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the storage root for generated overlays.
pub const ENV_STORAGE_ROOT: &str = "GRADCAM_STORAGE_PATH";
/// Environment variable overriding the model weight directory.
pub const ENV_MODEL_DIR: &str = "MODEL_PATH";
/// Environment variable selecting the compute device.
pub const ENV_DEVICE: &str = "TRIAGE_DEVICE";

/// Configuration for the triage pipeline, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Root directory for generated static files. Overlay images are written
    /// under `<storage_root>/gradcam/`.
    pub storage_root: PathBuf,
    /// Directory containing the model weight files
    /// (`seg_results/best_model.safetensors`,
    /// `clf_results/best_model.safetensors`).
    pub model_dir: PathBuf,
    /// Compute device selector: `"auto"`, `"cpu"`, `"cuda"`, or `"cuda:N"`.
    pub device: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("static"),
            model_dir: PathBuf::from("AI_model/models"),
            device: "auto".to_string(),
        }
    }
}

impl TriageConfig {
    /// Builds a configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_root: std::env::var_os(ENV_STORAGE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            model_dir: std::env::var_os(ENV_MODEL_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            device: std::env::var(ENV_DEVICE).unwrap_or(defaults.device),
        }
    }

    /// Directory where overlay images are written.
    pub fn gradcam_dir(&self) -> PathBuf {
        self.storage_root.join("gradcam")
    }

    /// Web-relative path under which a saved overlay is served.
    pub fn web_path(&self, file_name: &str) -> String {
        format!("/static/gradcam/{file_name}")
    }

    /// Resolves the configured device string to a Candle [`Device`].
    pub fn resolve_device(&self) -> TriageResult<Device> {
        parse_device(&self.device)
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> TriageError {
    TriageError::config_error("CUDA support not enabled. Compile with --features cuda")
}

/// Parses a device string and creates a Candle [`Device`].
///
/// # Supported formats
///
/// - `"auto"` → CUDA device 0 if available, else CPU
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N (e.g., `"cuda:1"`)
pub fn parse_device(device_str: &str) -> TriageResult<Device> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "auto" => Device::cuda_if_available(0)
            .map_err(|e| TriageError::config_error(format!("Failed to probe CUDA availability: {e}"))),
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0)
                    .map_err(|e| TriageError::config_error(format!("Failed to create CUDA device: {e}")))
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = s
                    .strip_prefix("cuda:")
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| TriageError::config_error(format!("Invalid CUDA device ordinal in '{s}'")))?;
                Device::new_cuda(ordinal)
                    .map_err(|e| TriageError::config_error(format!("Failed to create CUDA device {ordinal}: {e}")))
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        _ => Err(TriageError::config_error(format!(
            "Unknown device: '{device_str}'. Use 'auto', 'cpu', 'cuda', or 'cuda:N'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let config = TriageConfig::default();
        assert_eq!(config.storage_root, PathBuf::from("static"));
        assert_eq!(config.model_dir, PathBuf::from("AI_model/models"));
        assert_eq!(config.device, "auto");
    }

    #[test]
    fn web_path_has_static_prefix() {
        let config = TriageConfig::default();
        assert_eq!(
            config.web_path("gradcam_scan_0.png"),
            "/static/gradcam/gradcam_scan_0.png"
        );
    }

    #[test]
    fn parse_device_cpu_and_auto() {
        assert!(parse_device("cpu").unwrap().is_cpu());
        // "auto" resolves to CPU when no accelerator is present.
        assert!(parse_device("auto").is_ok());
        assert!(parse_device("tpu").is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = TriageConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: TriageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device, config.device);
        assert_eq!(back.storage_root, config.storage_root);
    }
}
