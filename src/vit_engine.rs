use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::tokio::Api};
use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::Engine;
use crate::types::Prediction;

#[derive(Debug, Clone)]
pub struct VitConfig {
    pub model_id: String,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub id2label: Option<HashMap<u32, String>>,
}

/// The `size` entry of `preprocessor_config.json`, which has taken several
/// shapes across transformers releases.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(usize),
    Dims { height: usize, width: usize },
    ShortestEdge { shortest_edge: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessorConfig {
    #[serde(default = "default_size")]
    pub size: ImageSize,
    #[serde(default)]
    pub do_center_crop: bool,
    #[serde(default)]
    pub crop_size: Option<ImageSize>,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f64,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_half")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_half")]
    pub image_std: [f32; 3],
}

fn default_size() -> ImageSize {
    ImageSize::Square(224)
}

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f64 {
    1.0 / 255.0
}

fn default_half() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            do_center_crop: false,
            crop_size: None,
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: default_half(),
            image_std: default_half(),
        }
    }
}

impl PreprocessorConfig {
    /// ViT defaults for a model trained on `image_size` square inputs.
    pub fn for_image_size(image_size: usize) -> Self {
        Self {
            size: ImageSize::Square(image_size),
            ..Self::default()
        }
    }

    /// `(height, width)` of the tensor fed to the model. A shortest-edge
    /// resize keeps the aspect ratio, so it only has a fixed size when
    /// followed by a center crop.
    pub fn output_size(&self) -> Result<(usize, usize)> {
        if self.do_center_crop {
            return match self.crop_size {
                Some(ImageSize::Square(side)) => Ok((side, side)),
                Some(ImageSize::Dims { height, width }) => Ok((height, width)),
                Some(ImageSize::ShortestEdge { .. }) => {
                    bail!("crop_size must give a fixed height and width")
                }
                None => bail!("do_center_crop is set without a crop_size"),
            };
        }

        match self.size {
            ImageSize::Square(side) => Ok((side, side)),
            ImageSize::Dims { height, width } => Ok((height, width)),
            ImageSize::ShortestEdge { .. } => {
                bail!("size.shortest_edge needs do_center_crop with a crop_size")
            }
        }
    }

    fn resize(&self, image: &DynamicImage) -> DynamicImage {
        match self.size {
            ImageSize::Square(side) => {
                image.resize_exact(side as u32, side as u32, FilterType::Triangle)
            }
            ImageSize::Dims { height, width } => {
                image.resize_exact(width as u32, height as u32, FilterType::Triangle)
            }
            ImageSize::ShortestEdge { shortest_edge } => {
                let (width, height) = (image.width().max(1) as u64, image.height().max(1) as u64);
                let edge = shortest_edge as u64;
                let (new_width, new_height) = if width <= height {
                    (edge, height * edge / width)
                } else {
                    (width * edge / height, edge)
                };
                image.resize_exact(new_width as u32, new_height as u32, FilterType::Triangle)
            }
        }
    }

    /// Turns an image into a `(1, 3, height, width)` f32 tensor on `device`.
    pub fn preprocess(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let (height, width) = self.output_size()?;
        let mut resized = self.resize(image);
        if self.do_center_crop {
            resized = center_crop(&resized, width as u32, height as u32);
        }
        let rgb = resized.to_rgb8();

        let mut pixels = Tensor::from_vec(rgb.into_raw(), (height, width, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        if self.do_rescale {
            pixels = (pixels * self.rescale_factor)?;
        }
        if self.do_normalize {
            let mean = Tensor::new(&self.image_mean, &Device::Cpu)?.reshape((3, 1, 1))?;
            let std = Tensor::new(&self.image_std, &Device::Cpu)?.reshape((3, 1, 1))?;
            pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
        }

        Ok(pixels.unsqueeze(0)?.to_device(device)?)
    }
}

/// Takes the centered `width`x`height` window. Images smaller than the
/// window are stretched to it.
fn center_crop(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let x = image.width().saturating_sub(width) / 2;
    let y = image.height().saturating_sub(height) / 2;
    let cropped = image.crop_imm(x, y, width, height);
    if cropped.width() == width && cropped.height() == height {
        cropped
    } else {
        cropped.resize_exact(width, height, FilterType::Triangle)
    }
}

/// The parts of a transformers `config.json` read outside `vit::Config`.
#[derive(Debug, Deserialize)]
struct ModelMeta {
    #[serde(default)]
    id2label: Option<HashMap<String, String>>,
    #[serde(default)]
    image_size: Option<usize>,
}

/// Reads `id2label` out of a transformers `config.json`, whose keys are
/// stringified class indices.
fn labels_from_model_config(raw: &str) -> Result<Option<HashMap<u32, String>>> {
    let meta: ModelMeta = serde_json::from_str(raw)?;
    meta
        .id2label
        .map(|labels| {
            labels
                .into_iter()
                .map(|(id, label)| {
                    let id = id
                        .parse::<u32>()
                        .with_context(|| format!("invalid id2label key {id:?}"))?;
                    Ok((id, label))
                })
                .collect::<Result<HashMap<u32, String>>>()
        })
        .transpose()
}

/// Pairs softmax probabilities with their labels, highest score first.
pub fn rank_predictions(probs: &[f32], id2label: &HashMap<u32, String>) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = probs
        .iter()
        .enumerate()
        .map(|(index, &score)| {
            let index = index as u32;
            let label = id2label
                .get(&index)
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{index}"));
            Prediction::new(label, score)
        })
        .collect();
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    predictions
}

struct ModelFiles {
    config: PathBuf,
    preprocessor: Option<PathBuf>,
    weights: PathBuf,
}

#[derive(Clone)]
pub struct VitEngine {
    model: Arc<vit::Model>,
    preprocessor: Arc<PreprocessorConfig>,
    id2label: Arc<HashMap<u32, String>>,
    device: Device,
    model_name: String,
}

impl VitEngine {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    /// Resolves model files from a local directory or the Hugging Face Hub.
    /// The hub client caches downloads, so only the first start pays for them.
    async fn fetch_files(config: &VitConfig) -> Result<ModelFiles> {
        let weights_name = if config.use_pth {
            "pytorch_model.bin"
        } else {
            "model.safetensors"
        };

        match &config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                let preprocessor = base_path.join("preprocessor_config.json");
                Ok(ModelFiles {
                    config: base_path.join("config.json"),
                    preprocessor: preprocessor.is_file().then_some(preprocessor),
                    weights: base_path.join(weights_name),
                })
            }
            None => {
                let repo = Repo::with_revision(
                    config.model_id.clone(),
                    RepoType::Model,
                    config.revision.clone(),
                );
                let api = Api::new()?.repo(repo);
                let config_file = api.get("config.json").await?;
                let preprocessor = match api.get("preprocessor_config.json").await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = %e, "No preprocessor config, using ViT defaults");
                        None
                    }
                };
                let weights = api.get(weights_name).await?;
                Ok(ModelFiles {
                    config: config_file,
                    preprocessor,
                    weights,
                })
            }
        }
    }

    #[tracing::instrument(skip(config), fields(model_id = %config.model_id, cpu = config.cpu))]
    pub async fn new(config: VitConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;
        let files = Self::fetch_files(&config).await?;

        let raw_config = std::fs::read_to_string(&files.config)
            .with_context(|| format!("reading {}", files.config.display()))?;
        let model_config: vit::Config = serde_json::from_str(&raw_config)?;

        // Command-line id2label takes precedence. Otherwise, use model config's id2label.
        let id2label = if let Some(id2label) = config.id2label {
            id2label
        } else if let Some(id2label) = labels_from_model_config(&raw_config)? {
            id2label
        } else {
            bail!("Id2Label not found in the model configuration nor specified as a parameter");
        };
        let num_labels = id2label.keys().max().map_or(0, |max| *max as usize + 1);
        if num_labels == 0 {
            bail!("Id2Label is empty");
        }

        let preprocessor: PreprocessorConfig = match &files.preprocessor {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)
                .with_context(|| format!("parsing {}", path.display()))?,
            None => {
                let meta: ModelMeta = serde_json::from_str(&raw_config)?;
                PreprocessorConfig::for_image_size(meta.image_size.unwrap_or(224))
            }
        };
        preprocessor.output_size()?;
        tracing::debug!(?preprocessor, num_labels, "Model configuration resolved");

        let vb = if config.use_pth {
            VarBuilder::from_pth(&files.weights, DType::F32, &device)?
        } else {
            unsafe { VarBuilder::from_mmaped_safetensors(&[files.weights], DType::F32, &device)? }
        };
        let model = vit::Model::new(&model_config, num_labels, vb)?;

        let model_name = match &config.model_path {
            Some(path) => path.display().to_string(),
            None => config.model_id,
        };

        Ok(Self {
            model: Arc::new(model),
            preprocessor: Arc::new(preprocessor),
            id2label: Arc::new(id2label),
            device,
            model_name,
        })
    }

    fn predict(&self, image: &DynamicImage) -> Result<Vec<Prediction>> {
        let pixels = self.preprocessor.preprocess(image, &self.device)?;
        let logits = self.model.forward(&pixels)?;
        let probs = softmax(&logits, 1)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(rank_predictions(&probs, &self.id2label))
    }
}

#[async_trait]
impl Engine for VitEngine {
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    async fn classify(&self, image: DynamicImage) -> Result<Vec<Prediction>> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.predict(&image)).await?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
