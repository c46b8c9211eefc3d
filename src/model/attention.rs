use std::f32::consts::PI;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, activation};

use super::config::BDHConfig;
use crate::positional::RotaryEmbedding;

/// Rotated keys and values seen so far, plus the score row of the most
/// recent query (`[batch, heads, context]`).
#[derive(Default, Debug, Clone)]
pub struct AttentionCache<B: Backend> {
    q_rot: Option<Tensor<B, 4>>,
    value: Option<Tensor<B, 4>>,
    last_scores: Option<Tensor<B, 3>>,
}

impl<B: Backend> AttentionCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.q_rot
            .as_ref()
            .map(|tensor| tensor.shape().dims::<4>()[2])
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, q_rot: Tensor<B, 4>, value: Tensor<B, 4>) {
        self.q_rot = Some(match self.q_rot.take() {
            Some(prev) => Tensor::cat(vec![prev, q_rot], 2),
            None => q_rot,
        });
        self.value = Some(match self.value.take() {
            Some(prev) => Tensor::cat(vec![prev, value], 2),
            None => value,
        });
    }

    pub fn last_scores(&self) -> Option<Tensor<B, 3>> {
        self.last_scores.clone()
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    freqs: Tensor<B, 4>,
    n_head: usize,
    rotary_embedding: RotaryEmbedding,
}

impl<B: Backend> Attention<B> {
    pub fn new(config: &BDHConfig, device: &B::Device) -> Self {
        let freqs = Self::build_freqs(
            config.latent_per_head(),
            config.rope_theta,
            config.rotary_embedding,
            device,
        );
        Self {
            freqs,
            n_head: config.n_head,
            rotary_embedding: config.rotary_embedding,
        }
    }

    /// Causal linear attention over `query` appended to whatever is cached.
    /// Scores are masked strictly below the diagonal, so a token never attends
    /// to itself.
    pub fn forward_cached(
        &self,
        query: Tensor<B, 4>,
        value: Tensor<B, 4>,
        cache: &mut AttentionCache<B>,
    ) -> Tensor<B, 4> {
        let position = cache.len();

        let q_rot = self.rotate(query, position);
        let k_rot = q_rot.clone();
        let value_rep = value.repeat_dim(1, self.n_head);

        let scores_self = q_rot.clone().matmul(k_rot.clone().swap_dims(2, 3)).tril(-1);
        let (scores, value_all) = match (&cache.q_rot, &cache.value) {
            (Some(prev_q), Some(prev_v)) => {
                let scores_prev = q_rot.matmul(prev_q.clone().swap_dims(2, 3));
                (
                    Tensor::cat(vec![scores_prev, scores_self], 3),
                    Tensor::cat(vec![prev_v.clone(), value_rep.clone()], 2),
                )
            }
            _ => (scores_self, value_rep.clone()),
        };

        let [batch, heads, time, context] = scores.shape().dims();
        if time > 0 {
            cache.last_scores = Some(
                scores
                    .clone()
                    .slice_dim(2, (time - 1)..time)
                    .reshape([batch, heads, context]),
            );
        }

        let output = scores.matmul(value_all);
        cache.append(k_rot, value_rep);
        output
    }

    fn rope(&self, phases: Tensor<B, 4>, values: Tensor<B, 4>) -> Tensor<B, 4> {
        let cos = phases.clone().cos();
        let sin = phases.sin();

        let [b, h, t, n] = values.shape().dims();
        let pairs = values.clone().reshape([b, h, t, n / 2, 2]);

        let even = pairs.clone().slice_dim(4, 0..1).squeeze_dim::<4>(4);
        let odd = pairs.slice_dim(4, 1..2).squeeze_dim::<4>(4);

        let rotated = Tensor::stack::<5>(vec![odd.neg(), even], 4).reshape([b, h, t, n]);

        values * cos + rotated * sin
    }

    fn pope(&self, phases: Tensor<B, 4>, values: Tensor<B, 4>) -> Tensor<B, 4> {
        let magnitude = activation::softplus(values, 1.0);
        let real = magnitude.clone() * phases.clone().cos();
        let imag = magnitude * phases.sin();
        Tensor::cat(vec![real, imag], 3)
    }

    fn rotate(&self, values: Tensor<B, 4>, start: usize) -> Tensor<B, 4> {
        let time = values.shape().dims::<4>()[2];
        let device = values.device();
        let positions = Tensor::<B, 1, Int>::arange(start as i64..(start + time) as i64, &device)
            .float()
            .reshape([1, 1, time, 1]);

        let raw = positions * self.freqs.clone();
        let phases = (raw.clone() - raw.floor()) * (2.0 * PI);
        match self.rotary_embedding {
            RotaryEmbedding::Rope => self.rope(phases, values),
            RotaryEmbedding::Pope => self.pope(phases, values),
        }
    }

    fn build_freqs(
        latent: usize,
        theta: f32,
        rotary_embedding: RotaryEmbedding,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let data: Vec<f32> = (0..latent)
            .map(|idx| 1.0 / theta.powf(rotary_embedding.exponent(idx, latent)) / (2.0 * PI))
            .collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([1, 1, 1, latent])
    }
}
