//! The triage pipeline: orchestrates segmentation, classification,
//! attribution, and overlay rendering behind a single entry point.
//!
//! [`TriagePipeline::predict`] runs the full chain for one radiograph. Model
//! state is guarded by a mutex held for the whole call, so concurrent
//! requests serialize on the models rather than interleave forward passes.
//! Attribution is best-effort per variant: a failed or empty map is logged
//! and omitted from the result, never fatal to the request.

use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::core::config::TriageConfig;
use crate::core::registry::ModelRegistry;
use crate::core::TriageResult;
use crate::domain::result::{findings_from, recommendations_for, InferenceResult, AI_NOTES};
use crate::domain::Mask;
use crate::models::{ClassificationModel, INPUT_SIZE};
use crate::processors::{AttributionEngine, CamAlgorithm, Compositor, Preprocessor};
use crate::utils::{load_image, resize_exact};

/// End-to-end chest radiograph triage.
#[derive(Debug)]
pub struct TriagePipeline {
    config: TriageConfig,
    registry: Mutex<ModelRegistry>,
    preprocessor: Preprocessor,
    engine: AttributionEngine,
    compositor: Compositor,
}

impl TriagePipeline {
    /// Creates a pipeline from the configuration. Weights are loaded lazily
    /// on the first prediction, or eagerly via [`load_models`](Self::load_models).
    pub fn new(config: TriageConfig) -> TriageResult<Self> {
        let registry = ModelRegistry::new(&config)?;
        Ok(Self::from_registry(config, registry))
    }

    /// Creates a pipeline around an existing registry. Used by tests and by
    /// embedders that attach an artifact provider first.
    pub fn from_registry(config: TriageConfig, registry: ModelRegistry) -> Self {
        Self {
            config,
            registry: Mutex::new(registry),
            preprocessor: Preprocessor::new(),
            engine: AttributionEngine::new(),
            compositor: Compositor::new(),
        }
    }

    /// Loads both models now instead of on the first prediction.
    pub fn load_models(&self) -> TriageResult<()> {
        self.lock_registry().load()
    }

    /// Drops both models, releasing their weights.
    pub fn unload_models(&self) {
        self.lock_registry().unload();
    }

    /// Runs the full triage chain for one radiograph and returns the
    /// structured result.
    ///
    /// Stages: decode and preprocess, lung segmentation, mask-restricted
    /// classification, then one attribution overlay per variant for the
    /// predicted class. The predicted class and confidence come from a
    /// single reporting forward pass; attribution explains that same pass.
    pub fn predict(&self, image_path: &Path) -> TriageResult<InferenceResult> {
        let mut registry = self.lock_registry();
        registry.load()?;
        let device = registry.device().clone();

        info!(path = %image_path.display(), "triage request");

        let started = std::time::Instant::now();
        let seg_input = self
            .preprocessor
            .prepare_for_segmentation(image_path, &device)?;
        let mask = registry.segmentation()?.segment(&seg_input)?;
        debug!(
            lung_pixels = mask.count_ones(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "segmentation complete"
        );

        let started = std::time::Instant::now();
        let clf_input = self
            .preprocessor
            .prepare_for_classification(image_path, &mask, &device)?;
        let probabilities = registry.classification()?.classify(&clf_input)?;
        let (predicted, confidence) = probabilities.top();
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classification forward complete"
        );
        info!(
            predicted = predicted.as_str(),
            confidence = confidence,
            "classification complete"
        );

        let mut result = InferenceResult {
            confidence,
            predicted_class: predicted.as_str().to_string(),
            findings: findings_from(&probabilities),
            recommendations: recommendations_for(confidence, predicted),
            ai_notes: AI_NOTES.to_string(),
            gradcam_path: None,
            gradcam_plus_path: None,
            layercam_path: None,
        };

        let model = registry.classification()?;
        let display = display_image(image_path)?;
        let stem = image_path
            .file_stem()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("image");

        for algorithm in CamAlgorithm::ALL {
            let web_path = self.render_attribution(
                model,
                &clf_input,
                &display,
                &mask,
                predicted.index(),
                stem,
                algorithm,
            );
            match algorithm {
                CamAlgorithm::GradCam => result.gradcam_path = web_path,
                CamAlgorithm::GradCamPlusPlus => result.gradcam_plus_path = web_path,
                CamAlgorithm::LayerCam => result.layercam_path = web_path,
            }
        }

        Ok(result)
    }

    /// Generates one attribution overlay. Best-effort: returns `None` and
    /// logs on any failure so the remaining variants still run.
    #[allow(clippy::too_many_arguments)]
    fn render_attribution(
        &self,
        model: &ClassificationModel,
        input: &candle_core::Tensor,
        display: &image::RgbImage,
        mask: &Mask,
        class_index: usize,
        stem: &str,
        algorithm: CamAlgorithm,
    ) -> Option<String> {
        let map = match self.engine.generate(model, input, class_index, algorithm) {
            Ok(Some(map)) => map,
            Ok(None) => {
                warn!(algorithm = %algorithm, "no attribution map produced, skipping");
                return None;
            }
            Err(error) => {
                warn!(algorithm = %algorithm, %error, "attribution failed, skipping");
                return None;
            }
        };

        let file_name = format!("{}_{stem}_{class_index}.png", algorithm.name());
        let output_path = self.config.gradcam_dir().join(&file_name);
        match self.compositor.render(display, &map, mask, &output_path) {
            Ok(_) => {
                debug!(algorithm = %algorithm, file = %file_name, "overlay saved");
                Some(self.config.web_path(&file_name))
            }
            Err(error) => {
                warn!(algorithm = %algorithm, %error, "overlay rendering failed, skipping");
                None
            }
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, ModelRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Decodes the source radiograph and resizes it to the display resolution
/// the overlays are rendered at.
fn display_image(path: &Path) -> TriageResult<image::RgbImage> {
    let img = load_image(path)?;
    Ok(resize_exact(&img, INPUT_SIZE as u32, INPUT_SIZE as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentationModel;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn zero_weight_pipeline(storage_root: &Path) -> TriagePipeline {
        let seg =
            SegmentationModel::load(VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let clf =
            ClassificationModel::load(VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let config = TriageConfig {
            storage_root: storage_root.to_path_buf(),
            device: "cpu".to_string(),
            ..TriageConfig::default()
        };
        let registry = ModelRegistry::from_models(seg, clf, Device::Cpu);
        TriagePipeline::from_registry(config, registry)
    }

    fn write_scan(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("scan.png");
        RgbImage::from_pixel(64, 64, Rgb([120, 120, 120]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn predict_produces_a_complete_result() {
        let dir = TempDir::new().unwrap();
        let pipeline = zero_weight_pipeline(dir.path());
        let scan = write_scan(dir.path());

        let result = pipeline.predict(&scan).unwrap();

        // Zero weights give a uniform distribution; ties resolve to the
        // first class index.
        assert_eq!(result.predicted_class, "COVID");
        assert!((result.confidence - 0.25).abs() < 1e-5);
        assert_eq!(result.findings.len(), 3);
        assert!(!result.recommendations.is_empty());
        assert_eq!(result.ai_notes, AI_NOTES);
    }

    #[test]
    fn predict_writes_one_overlay_per_variant() {
        let dir = TempDir::new().unwrap();
        let pipeline = zero_weight_pipeline(dir.path());
        let scan = write_scan(dir.path());

        let result = pipeline.predict(&scan).unwrap();

        let paths = [
            (&result.gradcam_path, "gradcam_scan_0.png"),
            (&result.gradcam_plus_path, "gradcam_plus_scan_0.png"),
            (&result.layercam_path, "layercam_scan_0.png"),
        ];
        for (web_path, file_name) in paths {
            assert_eq!(
                web_path.as_deref(),
                Some(format!("/static/gradcam/{file_name}").as_str())
            );
            let on_disk = dir.path().join("gradcam").join(file_name);
            assert!(on_disk.exists(), "missing {}", on_disk.display());
            let written = image::open(&on_disk).unwrap().to_rgb8();
            assert_eq!(written.dimensions(), (224, 224));
        }
    }

    #[test]
    fn repeated_predictions_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let pipeline = zero_weight_pipeline(dir.path());
        let scan = write_scan(dir.path());

        let first = pipeline.predict(&scan).unwrap();
        let second = pipeline.predict(&scan).unwrap();
        assert_eq!(first.predicted_class, second.predicted_class);
        assert_eq!(first.confidence, second.confidence);
        for (a, b) in first.findings.iter().zip(&second.findings) {
            assert_eq!(a.probability, b.probability);
        }
    }

    #[test]
    fn predict_rejects_undecodable_input() {
        let dir = TempDir::new().unwrap();
        let pipeline = zero_weight_pipeline(dir.path());

        let missing = dir.path().join("absent.png");
        assert!(matches!(
            pipeline.predict(&missing),
            Err(crate::core::TriageError::ImageDecode(_))
        ));

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();
        assert!(matches!(
            pipeline.predict(&garbage),
            Err(crate::core::TriageError::ImageDecode(_))
        ));
    }

    #[test]
    fn unload_requires_reload_before_use() {
        let dir = TempDir::new().unwrap();
        let pipeline = zero_weight_pipeline(dir.path());
        let scan = write_scan(dir.path());

        pipeline.unload_models();
        // The registry was built without weight files on disk, so the lazy
        // reload inside predict cannot succeed.
        assert!(pipeline.predict(&scan).is_err());
    }
}
