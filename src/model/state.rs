use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use super::attention::AttentionCache;

#[derive(Debug, Clone)]
pub struct LayerState<B: Backend> {
    pub attention: AttentionCache<B>,
}

/// Per-layer KV caches for one sequence.
#[derive(Debug, Clone)]
pub struct ModelState<B: Backend> {
    pub layers: Vec<LayerState<B>>,
}

impl<B: Backend> ModelState<B> {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: (0..num_layers)
                .map(|_| LayerState {
                    attention: AttentionCache::new(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.layers
            .first()
            .map(|layer| layer.attention.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last-query score row of `layer`, `[batch, heads, context]`.
    pub fn last_scores(&self, layer: usize) -> Option<Tensor<B, 3>> {
        self.layers
            .get(layer)
            .and_then(|state| state.attention.last_scores())
    }
}
