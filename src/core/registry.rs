//! Model registry: owns the two loaded networks and their weight files.
//!
//! Loading is idempotent and forgiving in the same way the training-side
//! checkpoints demand: weight maps may arrive wrapped under a
//! `model_state_dict.` prefix, may contain extra entries the inference
//! graphs never ask for, and may miss entries for layers that were added
//! after a checkpoint was cut. Extra entries are ignored; missing or
//! shape-mismatched entries fall back to the layer's init with a warning
//! instead of failing the whole load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, VarBuilder};
use tracing::{info, warn};

use crate::core::config::TriageConfig;
use crate::core::errors::{TriageError, TriageResult};
use crate::models::{ClassificationModel, SegmentationModel};

/// Checkpoint key prefix produced by training-side full-state saves.
const CHECKPOINT_KEY_PREFIX: &str = "model_state_dict.";

/// Weight file for the lung segmentation model, relative to the model dir.
pub const SEGMENTATION_WEIGHTS: &str = "seg_results/best_model.safetensors";
/// Weight file for the classification model, relative to the model dir.
pub const CLASSIFICATION_WEIGHTS: &str = "clf_results/best_model.safetensors";

/// Fetches missing model artifacts into the model directory.
///
/// The registry calls the provider once, before giving up on an absent
/// weight file. Deployments that ship weights in the image can skip it.
pub trait ArtifactProvider: Send + Sync {
    /// Makes the weight files available under `model_dir`.
    fn fetch(&self, model_dir: &Path) -> TriageResult<()>;
}

/// Owns the segmentation and classification models for the pipeline.
pub struct ModelRegistry {
    model_dir: PathBuf,
    device: Device,
    provider: Option<Box<dyn ArtifactProvider>>,
    segmentation: Option<SegmentationModel>,
    classification: Option<ClassificationModel>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_dir", &self.model_dir)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelRegistry {
    /// Creates an empty registry from the configuration. No weights are
    /// read until [`load`](Self::load) is called.
    pub fn new(config: &TriageConfig) -> TriageResult<Self> {
        Ok(Self {
            model_dir: config.model_dir.clone(),
            device: config.resolve_device()?,
            provider: None,
            segmentation: None,
            classification: None,
        })
    }

    /// Attaches an artifact provider consulted when a weight file is absent.
    pub fn with_provider(mut self, provider: Box<dyn ArtifactProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Builds a registry around already-constructed models. Used by tests
    /// and by embedders that manage weights themselves.
    pub fn from_models(
        segmentation: SegmentationModel,
        classification: ClassificationModel,
        device: Device,
    ) -> Self {
        Self {
            model_dir: PathBuf::new(),
            device,
            provider: None,
            segmentation: Some(segmentation),
            classification: Some(classification),
        }
    }

    /// The device both models run on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether both models are resident.
    pub fn is_loaded(&self) -> bool {
        self.segmentation.is_some() && self.classification.is_some()
    }

    /// Loads both models from their weight files. Idempotent: a second call
    /// on a loaded registry is a no-op.
    pub fn load(&mut self) -> TriageResult<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let seg_path = self.resolve_artifact(SEGMENTATION_WEIGHTS)?;
        let clf_path = self.resolve_artifact(CLASSIFICATION_WEIGHTS)?;

        let seg_weights = load_weight_map(&seg_path, &self.device)?;
        info!(
            model = "segmentation",
            path = %seg_path.display(),
            parameters = parameter_count(&seg_weights),
            "loading weights"
        );
        self.segmentation = Some(SegmentationModel::load(checkpoint_builder(
            seg_weights,
            &self.device,
        ))?);

        let clf_weights = load_weight_map(&clf_path, &self.device)?;
        info!(
            model = "classification",
            path = %clf_path.display(),
            parameters = parameter_count(&clf_weights),
            "loading weights"
        );
        self.classification = Some(ClassificationModel::load(checkpoint_builder(
            clf_weights,
            &self.device,
        ))?);

        Ok(())
    }

    /// Drops both models, releasing their weights.
    pub fn unload(&mut self) {
        self.segmentation = None;
        self.classification = None;
        info!("models unloaded");
    }

    /// The resident segmentation model.
    pub fn segmentation(&self) -> TriageResult<&SegmentationModel> {
        self.segmentation
            .as_ref()
            .ok_or_else(|| TriageError::ModelNotLoaded {
                model_name: "segmentation".to_string(),
            })
    }

    /// The resident classification model.
    pub fn classification(&self) -> TriageResult<&ClassificationModel> {
        self.classification
            .as_ref()
            .ok_or_else(|| TriageError::ModelNotLoaded {
                model_name: "classification".to_string(),
            })
    }

    /// Resolves a weight file, consulting the artifact provider once if the
    /// file is initially absent.
    fn resolve_artifact(&self, relative: &str) -> TriageResult<PathBuf> {
        let path = self.model_dir.join(relative);
        if !path.exists() {
            if let Some(provider) = &self.provider {
                info!(path = %path.display(), "artifact absent, invoking provider");
                provider.fetch(&self.model_dir)?;
            }
        }
        if path.exists() {
            Ok(path)
        } else {
            Err(TriageError::ModelArtifactMissing { path })
        }
    }
}

/// Reads a safetensors file and unwraps training-checkpoint key prefixes.
fn load_weight_map(path: &Path, device: &Device) -> TriageResult<HashMap<String, Tensor>> {
    let raw = candle_core::safetensors::load(path, device).map_err(|e| {
        crate::core::errors::candle_inference("registry", format!("read {}", path.display()), e)
    })?;
    Ok(raw
        .into_iter()
        .map(|(name, tensor)| {
            let name = name
                .strip_prefix(CHECKPOINT_KEY_PREFIX)
                .map(str::to_string)
                .unwrap_or(name);
            (name, tensor)
        })
        .collect())
}

fn parameter_count(weights: &HashMap<String, Tensor>) -> usize {
    weights.values().map(Tensor::elem_count).sum()
}

fn checkpoint_builder(weights: HashMap<String, Tensor>, device: &Device) -> VarBuilder<'static> {
    VarBuilder::from_backend(
        Box::new(CheckpointBackend { tensors: weights }),
        DType::F32,
        device.clone(),
    )
}

/// Weight backend that warns and falls back to layer init on missing or
/// shape-mismatched entries, mirroring a non-strict state-dict load.
struct CheckpointBackend {
    tensors: HashMap<String, Tensor>,
}

impl CheckpointBackend {
    fn fallback(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
        reason: &str,
    ) -> candle_core::Result<Tensor> {
        warn!(name, reason, "checkpoint entry unusable, keeping layer init");
        Ok(h.var(s, dtype, dev)?.as_tensor().detach())
    }
}

impl SimpleBackend for CheckpointBackend {
    fn get(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        match self.tensors.get(name) {
            Some(t) if t.shape() == &s => t.to_device(dev)?.to_dtype(dtype),
            Some(t) => {
                let reason = format!("shape {:?} != expected {:?}", t.shape(), s);
                self.fallback(s, name, h, dtype, dev, &reason)
            }
            None => self.fallback(s, name, h, dtype, dev, "not present"),
        }
    }

    fn get_unchecked(
        &self,
        name: &str,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        match self.tensors.get(name) {
            Some(t) => t.to_device(dev)?.to_dtype(dtype),
            None => Err(candle_core::Error::CannotFindTensor {
                path: name.to_string(),
            }
            .bt()),
        }
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }
}
