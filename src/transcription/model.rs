//! # Whisper Model Management
//!
//! Loads a Whisper model with candle once at startup and hands out decoders
//! that share its weights.
//!
//! ## Model Loading Process:
//! 1. Resolve the files: a local directory if `model.path` is set, otherwise
//!    the Hugging Face Hub repository for the configured size (cached locally)
//! 2. Load the tokenizer and model configuration
//! 3. Memory-map the safetensors weights onto the selected device
//! 4. Build the mel filter bank and look up the special token ids
//! 5. Validate the model by decoding one second of silence
//!
//! ## Memory Management:
//! `WhisperAssets` is immutable after loading. Each `WhisperDecoder` clones
//! the candle model, which copies reference-counted tensor handles rather
//! than the weights, so every session gets its own decoder KV cache over
//! one shared copy of the weights.

use crate::config::ModelConfig;
use crate::error::RecognitionError;
use crate::transcription::mel;
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// Larger models are more accurate but slower per decode, which directly
/// adds latency to every partial and final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Hugging Face repository holding this size.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate download size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Where the model files came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Local(PathBuf),
    Hub(String),
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Hub(repo) => write!(f, "hf://{}", repo),
        }
    }
}

/// Token ids the decoding loop needs.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    language: Option<u32>,
}

/// Everything loaded from disk, shared read-only by all sessions.
pub struct WhisperAssets {
    /// Template model; never run directly, only cloned into decoders
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    device: Device,
    name: String,
    source: ModelSource,
}

impl WhisperAssets {
    /// Resolve and load the model described by `config`.
    ///
    /// Any failure here is fatal: the caller must not start serving.
    pub async fn load(config: &ModelConfig, device: Device) -> Result<Self> {
        let size: ModelSize = config.size.parse()?;
        let start_time = std::time::Instant::now();

        let (source, files) = match &config.path {
            Some(dir) => {
                tracing::info!("Loading Whisper model from {}", dir.display());
                (ModelSource::Local(dir.clone()), ModelFiles::in_dir(dir)?)
            }
            None => {
                tracing::info!(
                    "Fetching Whisper {} model (~{} MB) from {}",
                    size,
                    size.size_mb(),
                    size.repo_name()
                );
                let files = ModelFiles::from_hub(size.repo_name()).await?;
                (ModelSource::Hub(size.repo_name().to_string()), files)
            }
        };

        let model_config: Config = serde_json::from_reader(
            std::fs::File::open(&files.config)
                .with_context(|| format!("Failed to open {}", files.config.display()))?,
        )
        .context("Invalid model config.json")?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            // English-only checkpoints have no language tokens at all
            language: config
                .language
                .as_deref()
                .and_then(|lang| tokenizer.token_to_id(&format!("<|{}|>", lang))),
        };

        let mel_filters = mel::filter_bank(model_config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE as u32);

        // SAFETY: the weights file is memory-mapped read-only and must not be
        // modified while the process runs.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, model_config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        let assets = Self {
            model,
            config: model_config,
            tokenizer,
            mel_filters,
            tokens,
            device,
            name: format!("whisper-{}", size),
            source,
        };
        assets.validate()?;

        Ok(assets)
    }

    /// Decode one second of silence to prove the weights actually run.
    fn validate(&self) -> Result<()> {
        let mut decoder = WhisperDecoder::new(Arc::new(self.shallow_clone()));
        let text = decoder
            .transcribe(&vec![0.0f32; m::SAMPLE_RATE])
            .map_err(|e| anyhow!("Model validation failed: {}", e))?;
        tracing::debug!("Model validation successful, test result: '{}'", text);
        Ok(())
    }

    fn shallow_clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            config: self.config.clone(),
            tokenizer: self.tokenizer.clone(),
            mel_filters: self.mel_filters.clone(),
            tokens: self.tokens,
            device: self.device.clone(),
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }
}

/// Paths of the three files a model needs.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn in_dir(dir: &Path) -> Result<Self> {
        let files = Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        };

        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.exists() {
                return Err(anyhow!("Model file not found: {}", path.display()));
            }
        }

        Ok(files)
    }

    async fn from_hub(repo_name: &str) -> Result<Self> {
        use hf_hub::api::tokio::ApiBuilder;

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(cache_dir.into());
        }

        let api = builder.build().context("Failed to create Hugging Face API client")?;
        let repo = api.model(repo_name.to_string());

        let config = repo
            .get("config.json")
            .await
            .with_context(|| format!("Failed to download config.json from {}", repo_name))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("Failed to download tokenizer.json from {}", repo_name))?;
        let weights = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("Failed to download model.safetensors from {}", repo_name))?;

        Ok(Self { config, tokenizer, weights })
    }
}

/// A per-session decoder. Owns its own copy of the mutable decoder state.
pub struct WhisperDecoder {
    model: m::model::Whisper,
    assets: Arc<WhisperAssets>,
}

impl WhisperDecoder {
    pub fn new(assets: Arc<WhisperAssets>) -> Self {
        Self {
            model: assets.model.clone(),
            assets,
        }
    }

    /// Transcribe up to 30 seconds of 16 kHz mono audio in `[-1.0, 1.0]`.
    ///
    /// Audio is zero-padded to the full 30 second window Whisper was trained
    /// on; longer input is truncated.
    pub fn transcribe(&mut self, pcm: &[f32]) -> Result<String, RecognitionError> {
        if pcm.is_empty() {
            return Ok(String::new());
        }

        let assets = &self.assets;
        let mut padded = vec![0.0f32; m::N_SAMPLES];
        let copy_len = pcm.len().min(m::N_SAMPLES);
        padded[..copy_len].copy_from_slice(&pcm[..copy_len]);

        let mel = audio::pcm_to_mel(&assets.config, &padded, &assets.mel_filters);
        let n_mels = assets.config.num_mel_bins;
        let n_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &assets.device)?
            .narrow(2, 0, n_frames.min(m::N_FRAMES))?;

        let audio_features = self.model.encoder.forward(&mel, true)?;

        let mut tokens = vec![assets.tokens.sot];
        if let Some(language) = assets.tokens.language {
            tokens.push(language);
        }
        tokens.push(assets.tokens.transcribe);
        tokens.push(assets.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let sample_len = assets.config.max_target_positions / 2;
        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &assets.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == assets.tokens.eot || is_repetitive(&tokens[prompt_len..], next_token) {
                break;
            }
            tokens.push(next_token);
        }

        let text = assets
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| RecognitionError::Decode(e.to_string()))?;

        Ok(text.trim().to_string())
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Token '{}' not found in vocabulary", token))
}

/// Greedy decoding loops on silence and noise; stop when the tail repeats.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    let n = tokens.len();
    if n >= 3 && tokens[n - 3..].iter().all(|&t| t == new_token) {
        return true;
    }

    if n >= 5 {
        let mut candidate = tokens[n - 2..].to_vec();
        candidate.push(new_token);
        if candidate == tokens[n - 5..n - 2] {
            return true;
        }
    }

    false
}
