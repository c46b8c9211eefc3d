//! Model boundary: turns an utterance into a next-token distribution and the
//! per-head attention of its final position.

use std::path::Path;

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::entropy::softmax;
use crate::error::{ProbeError, ProbeResult};
use crate::model::BDH;
use crate::tokenizer::{SharedTokenizer, Tokenizer};

/// What one forward pass reveals about a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnProbe {
    pub token_count: usize,
    pub next_token_probs: Vec<f64>,
    /// One normalised weight vector per head over the context positions.
    pub head_attention: Vec<Vec<f64>>,
}

pub trait LanguageProbe {
    fn tokenizer(&self) -> &dyn Tokenizer;

    fn probe(&self, text: &str) -> ProbeResult<TurnProbe>;
}

pub struct BdhProbe<B: Backend> {
    model: BDH<B>,
    tokenizer: SharedTokenizer,
    device: B::Device,
    layer: usize,
    window: Option<usize>,
}

impl<B: Backend> BdhProbe<B> {
    pub fn new(
        model: BDH<B>,
        tokenizer: SharedTokenizer,
        device: B::Device,
        layer: usize,
    ) -> ProbeResult<Self> {
        if tokenizer.len() > model.vocab_size() {
            return Err(ProbeError::Config(format!(
                "tokenizer has {} tokens but the model vocabulary holds {}",
                tokenizer.len(),
                model.vocab_size()
            )));
        }
        if layer >= model.n_layer() {
            return Err(ProbeError::Config(format!(
                "attention layer {layer} out of range for {} layers",
                model.n_layer()
            )));
        }
        Ok(Self {
            model,
            tokenizer,
            device,
            layer,
            window: None,
        })
    }

    /// Build the model described by `config`, seeding the backend first and
    /// loading `config.checkpoint` when one is set.
    pub fn from_config(
        config: &ModelConfig,
        tokenizer: SharedTokenizer,
        device: B::Device,
    ) -> ProbeResult<Self> {
        B::seed(&device, config.seed);
        let bdh_config = config.to_bdh(tokenizer.len());
        bdh_config.validate()?;
        let layer = bdh_config.resolve_layer(config.attention_layer)?;

        let mut model = BDH::<B>::new(bdh_config, &device);
        match &config.checkpoint {
            Some(path) => {
                model = load_checkpoint(model, path, &device)?;
                info!("Loaded {} from {}", config.name, path.display());
            }
            None => info!(
                "Initialised {} with random weights (seed {})",
                config.name, config.seed
            ),
        }

        Self::new(model, tokenizer, device, layer)
    }

    pub fn with_window(mut self, window: Option<usize>) -> Self {
        self.window = window;
        self
    }

    pub fn n_head(&self) -> usize {
        self.model.n_head()
    }

    fn read_back<const D: usize>(tensor: Tensor<B, D>) -> ProbeResult<Vec<f32>> {
        tensor
            .to_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|err| ProbeError::Model(format!("{err:?}")))
    }
}

impl<B: Backend> LanguageProbe for BdhProbe<B> {
    fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    fn probe(&self, text: &str) -> ProbeResult<TurnProbe> {
        let mut tokens: Vec<i64> = self
            .tokenizer
            .encode(text, true, false)
            .into_iter()
            .map(i64::from)
            .collect();
        if let Some(window) = self.window
            && tokens.len() > window
        {
            tokens.drain(..tokens.len() - window);
        }
        if tokens.is_empty() {
            return Err(ProbeError::InputShape(format!(
                "utterance {text:?} produced no tokens"
            )));
        }

        let token_count = tokens.len();
        let input = Tensor::<B, 2, Int>::from_data(
            TensorData::new(tokens, [1, token_count]),
            &self.device,
        );

        let mut state = self.model.init_state();
        let logits = self.model.forward_with_state(input, &mut state);
        let [_, time, vocab] = logits.shape().dims::<3>();
        if time != token_count {
            return Err(ProbeError::Model(format!(
                "forward produced {time} positions for {token_count} tokens"
            )));
        }
        let last_logits = logits.slice_dim(1, (time - 1)..time).reshape([vocab]);
        let next_token_probs = softmax(&Self::read_back(last_logits)?);

        let scores = state.last_scores(self.layer).ok_or_else(|| {
            ProbeError::Model(format!("layer {} recorded no attention", self.layer))
        })?;
        let [_, heads, context] = scores.shape().dims::<3>();
        let values = Self::read_back(scores.slice_dim(0, 0..1))?;
        let head_attention = values
            .chunks(context)
            .take(heads)
            .map(|row| softmax(attended_prefix(row)))
            .collect();

        debug!(token_count, heads, "probed utterance");
        Ok(TurnProbe {
            token_count,
            next_token_probs,
            head_attention,
        })
    }
}

/// The final query is masked from itself; only earlier positions carry
/// scores unless it is the sole position.
fn attended_prefix(row: &[f32]) -> &[f32] {
    if row.len() > 1 {
        &row[..row.len() - 1]
    } else {
        row
    }
}

fn load_checkpoint<B: Backend>(
    model: BDH<B>,
    path: &Path,
    device: &B::Device,
) -> ProbeResult<BDH<B>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let record = recorder
        .load::<<BDH<B> as Module<B>>::Record>(path.to_path_buf(), device)
        .map_err(|err| {
            ProbeError::Model(format!("failed to load checkpoint {}: {err}", path.display()))
        })?;
    Ok(model.load_record(record))
}
