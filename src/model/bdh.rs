use burn::module::{Module, Param};
use burn::nn::{Embedding, EmbeddingConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor, activation};

use super::attention::Attention;
use super::config::BDHConfig;
use super::state::ModelState;

const LAYER_NORM_EPS: f32 = 1e-5;

/// Baby Dragon Hatchling causal language model, inference path only.
///
/// Every layer shares the same sparse decoder/encoder weights; the model is
/// probed for its next-token logits and the score row of the last query.
#[derive(Module, Debug)]
pub struct BDH<B: Backend> {
    n_layer: usize,
    n_embd: usize,
    n_head: usize,
    vocab_size: usize,
    relu_threshold: f32,
    embed: Embedding<B>,
    attention: Attention<B>,
    decoder_x: Param<Tensor<B, 3>>,
    decoder_y: Param<Tensor<B, 3>>,
    encoder: Param<Tensor<B, 2>>,
    lm_head: Param<Tensor<B, 2>>,
}

impl<B: Backend> BDH<B> {
    pub fn new(config: BDHConfig, device: &B::Device) -> Self {
        let embed = EmbeddingConfig::new(config.vocab_size, config.n_embd).init(device);

        let latent_per_head = config.latent_per_head();
        let latent_total = config.latent_total();
        let attention = Attention::new(&config, device);

        let weight_init =
            |shape: [usize; 2]| Tensor::<B, 2>::random(shape, Distribution::Normal(0.0, 0.02), device);
        let decoder_init = || {
            Param::from_tensor(Tensor::<B, 3>::random(
                [config.n_head, config.n_embd, latent_per_head],
                Distribution::Normal(0.0, 0.02),
                device,
            ))
        };

        Self {
            n_layer: config.n_layer,
            n_embd: config.n_embd,
            n_head: config.n_head,
            vocab_size: config.vocab_size,
            relu_threshold: config.relu_threshold,
            embed,
            attention,
            decoder_x: decoder_init(),
            decoder_y: decoder_init(),
            encoder: Param::from_tensor(weight_init([latent_total, config.n_embd])),
            lm_head: Param::from_tensor(weight_init([config.n_embd, config.vocab_size])),
        }
    }

    pub fn n_layer(&self) -> usize {
        self.n_layer
    }

    pub fn n_head(&self) -> usize {
        self.n_head
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn layer_norm<const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let (var, mean) = tensor.clone().var_mean_bias(D - 1);
        tensor.sub(mean).div(var.add_scalar(LAYER_NORM_EPS).sqrt())
    }

    fn sparse(&self, input: Tensor<B, 4>, decoder: Tensor<B, 3>) -> Tensor<B, 4> {
        let mut latent = input.matmul(decoder.unsqueeze_dim::<4>(0));
        if self.relu_threshold != 0.0 {
            latent = latent.sub_scalar(self.relu_threshold);
        }
        activation::relu(latent)
    }

    /// Full-sequence forward pass with a throwaway state.
    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let mut state = self.init_state();
        self.forward_with_state(tokens, &mut state)
    }

    pub fn init_state(&self) -> ModelState<B> {
        ModelState::new(self.n_layer)
    }

    /// Forward `tokens` after whatever `state` already holds. On return each
    /// layer's cache carries the score row of the final query position.
    pub fn forward_with_state(
        &self,
        tokens: Tensor<B, 2, Int>,
        state: &mut ModelState<B>,
    ) -> Tensor<B, 3> {
        debug_assert_eq!(state.layers.len(), self.n_layer, "model state layers mismatch");

        let mut current = self.layer_norm(self.embed.forward(tokens).unsqueeze_dim::<4>(1));

        let decoder_x = self.decoder_x.val();
        let decoder_y = self.decoder_y.val();
        let encoder = self.encoder.val();

        for layer_state in &mut state.layers {
            let x_sparse = self.sparse(current.clone(), decoder_x.clone());

            let attn = self.attention.forward_cached(
                x_sparse.clone(),
                current.clone(),
                &mut layer_state.attention,
            );
            let attn = self.layer_norm(attn);

            let y_sparse = self.sparse(attn, decoder_y.clone());
            let mixed = (x_sparse * y_sparse).swap_dims(1, 2);
            let [batch, time, heads, latent] = mixed.shape().dims();

            let mlp_out = mixed
                .reshape([batch * time, heads * latent])
                .matmul(encoder.clone())
                .reshape([batch, time, self.n_embd])
                .unsqueeze_dim::<4>(1);
            let mlp_out = self.layer_norm(mlp_out);
            current = self.layer_norm(current + mlp_out);
        }

        let [batch, _, time, dim] = current.shape().dims();
        current
            .reshape([batch * time, dim])
            .matmul(self.lm_head.val())
            .reshape([batch, time, self.vocab_size])
    }
}
