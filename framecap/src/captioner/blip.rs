use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::blip;
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::RgbImage;
use tokenizers::Tokenizer;

use super::preprocess::PixelValues;
use super::{CaptionError, Captioner};

/// The `[DEC]` token BLIP starts every caption with
const DEC_TOKEN_ID: u32 = 30522;
/// `[SEP]` ends a caption
const SEP_TOKEN_ID: u32 = 102;

/// The model used unless told otherwise
pub const DEFAULT_MODEL: &str = "Salesforce/blip-image-captioning-large";
/// The first revision of [DEFAULT_MODEL] with safetensors weights
const DEFAULT_MODEL_REVISION: &str = "refs/pr/18";
const MAIN_REVISION: &str = "main";

/// Where to get the model from and how long captions may get
#[derive(Debug, Clone)]
pub struct BlipConfig {
    /// A model id on the hub, or a local directory with `model.safetensors`,
    /// `tokenizer.json` and preferably `config.json`
    pub model: String,
    /// Revision on the hub, see [BlipConfig::revision]
    pub revision: Option<String>,
    /// Maximum number of tokens in a caption, the start token included
    pub max_length: usize,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            revision: None,
            max_length: 40,
        }
    }
}

impl BlipConfig {
    /// The requested revision. Without one the default model gets a revision known to
    /// have safetensors weights, every other model gets `main`.
    pub fn revision(&self) -> &str {
        match &self.revision {
            Some(revision) => revision,
            None if self.model == DEFAULT_MODEL => DEFAULT_MODEL_REVISION,
            None => MAIN_REVISION,
        }
    }
}

/// Picks the device the model runs on. Done once, the result is handed to the model.
pub fn select_device(force_cpu: bool) -> Device {
    #[cfg(feature = "cuda")]
    if !force_cpu {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("CUDA not available, defaulting to CPU: {e}"),
        }
    }

    #[cfg(not(feature = "cuda"))]
    if !force_cpu {
        log::debug!("Built without CUDA support, using the CPU");
    }

    Device::Cpu
}

/// Salesforce's BLIP, greedy decoding
pub struct BlipCaptioner {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    logits_processor: LogitsProcessor,
    device: Device,
    max_length: usize,
}

impl BlipCaptioner {
    pub fn load(config: &BlipConfig, device: Device) -> Result<Self, CaptionError> {
        let files = fetch_files(config)?;
        log::debug!("Model weights at {}", files.weights.display());

        let tokenizer = Tokenizer::from_file(files.tokenizer)?;
        let blip_config = read_config(files.config.as_deref())?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], DType::F32, &device)?
        };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;

        Ok(Self {
            model,
            tokenizer,
            logits_processor: LogitsProcessor::from_sampling(0, Sampling::ArgMax),
            device,
            max_length: config.max_length,
        })
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, CaptionError> {
        let text = self.tokenizer.decode(tokens, true)?;
        Ok(text.trim().to_string())
    }
}

impl Captioner for BlipCaptioner {
    type Input = PixelValues;

    fn prepare(image: &RgbImage) -> Self::Input {
        PixelValues::from_image(image)
    }

    fn generate(&mut self, input: Self::Input) -> Result<String, CaptionError> {
        self.model.reset_kv_cache();

        let image = input.to_tensor(&self.device)?;
        let image_embeds = self.model.vision_model().forward(&image)?;

        let mut tokens = vec![DEC_TOKEN_ID];
        for index in 0..self.max_length.saturating_sub(1) {
            // the kv cache remembers everything but the newest token
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = self
                .model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;

            let token = self.logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            tokens.push(token);
        }

        log::trace!("Generated {} tokens", tokens.len() - 1);
        self.decode(&tokens[1..])
    }
}

struct ModelFiles {
    weights: PathBuf,
    tokenizer: PathBuf,
    /// `None` if the model doesn't come with a `config.json`
    config: Option<PathBuf>,
}

/// Paths to the model files, downloading them if needed
fn fetch_files(config: &BlipConfig) -> Result<ModelFiles, CaptionError> {
    let local = Path::new(&config.model);
    if local.is_dir() {
        log::info!("Loading the model from {}", local.display());
        let config_file = local.join("config.json");
        return Ok(ModelFiles {
            weights: local.join("model.safetensors"),
            tokenizer: local.join("tokenizer.json"),
            config: config_file.is_file().then_some(config_file),
        });
    }

    let revision = config.revision();
    log::info!("Fetching {} at {} from the hub", config.model, revision);
    let repo = Api::new()?.repo(Repo::with_revision(
        config.model.clone(),
        RepoType::Model,
        revision.to_string(),
    ));
    let weights = repo.get("model.safetensors")?;
    let tokenizer = repo.get("tokenizer.json")?;
    let config = match repo.get("config.json") {
        Ok(path) => Some(path),
        Err(e) => {
            log::debug!("No config.json for {}: {e}", config.model);
            None
        }
    };
    Ok(ModelFiles {
        weights,
        tokenizer,
        config,
    })
}

/// The architecture described by `config.json`, or the large BLIP one without it
fn read_config(path: Option<&Path>) -> Result<blip::Config, CaptionError> {
    let Some(path) = path else {
        log::warn!("The model has no config.json, assuming it is a large BLIP");
        return Ok(blip::Config::image_captioning_large());
    };
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpu_when_asked() {
        assert!(select_device(true).is_cpu());
    }

    #[test]
    fn pinned_revision_only_for_the_default_model() {
        assert_eq!(DEFAULT_MODEL_REVISION, BlipConfig::default().revision());

        let base = BlipConfig {
            model: "Salesforce/blip-image-captioning-base".to_string(),
            ..BlipConfig::default()
        };
        assert_eq!("main", base.revision());

        let pinned = BlipConfig {
            revision: Some("v2".to_string()),
            ..base
        };
        assert_eq!("v2", pinned.revision());
    }

    #[test]
    fn local_dirs_are_not_downloaded() -> Result<(), CaptionError> {
        let dir = tempfile::tempdir()?;
        let config = BlipConfig {
            model: dir.path().to_string_lossy().into_owned(),
            ..BlipConfig::default()
        };
        let files = fetch_files(&config)?;
        assert_eq!(dir.path().join("model.safetensors"), files.weights);
        assert_eq!(dir.path().join("tokenizer.json"), files.tokenizer);
        assert_eq!(None, files.config);

        std::fs::write(dir.path().join("config.json"), BASE_CONFIG)?;
        let files = fetch_files(&config)?;
        assert_eq!(Some(dir.path().join("config.json")), files.config);
        Ok(())
    }

    /// The interesting parts of blip-image-captioning-base's config.json
    const BASE_CONFIG: &str = r#"{
        "architectures": ["BlipForConditionalGeneration"],
        "image_text_hidden_size": 256,
        "projection_dim": 512,
        "text_config": {
            "vocab_size": 30524,
            "hidden_size": 768,
            "encoder_hidden_size": 768,
            "intermediate_size": 3072,
            "projection_dim": 768,
            "num_hidden_layers": 12,
            "num_attention_heads": 12,
            "max_position_embeddings": 512,
            "hidden_act": "gelu",
            "layer_norm_eps": 1e-12,
            "is_decoder": true
        },
        "vision_config": {
            "hidden_size": 768,
            "intermediate_size": 3072,
            "projection_dim": 512,
            "num_hidden_layers": 12,
            "num_attention_heads": 12,
            "image_size": 384,
            "patch_size": 16,
            "hidden_act": "gelu",
            "layer_norm_eps": 1e-5
        }
    }"#;

    #[test]
    fn config_json_decides_the_architecture() -> Result<(), CaptionError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, BASE_CONFIG)?;

        let base = read_config(Some(&path))?;
        assert_eq!(768, base.vision_config.hidden_size);
        assert_eq!(12, base.vision_config.num_hidden_layers);
        assert_eq!(768, base.text_config.encoder_hidden_size);

        let large = read_config(None)?;
        assert_eq!(1024, large.vision_config.hidden_size);
        assert_eq!(24, large.vision_config.num_hidden_layers);
        Ok(())
    }

    #[test]
    fn broken_config_json_fails() -> Result<(), CaptionError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"projection_dim": 512}"#)?;
        assert!(matches!(
            read_config(Some(&path)),
            Err(CaptionError::ConfigError(_))
        ));
        Ok(())
    }

    #[test]
    fn loading_garbage_fails() -> Result<(), CaptionError> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("tokenizer.json"), "not json")?;
        let config = BlipConfig {
            model: dir.path().to_string_lossy().into_owned(),
            ..BlipConfig::default()
        };
        assert!(BlipCaptioner::load(&config, Device::Cpu).is_err());
        Ok(())
    }
}
