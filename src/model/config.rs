use crate::error::{ProbeError, ProbeResult};
use crate::positional::RotaryEmbedding;

/// Shape of the BDH causal language model behind the probe.
#[derive(Clone, Debug, PartialEq)]
pub struct BDHConfig {
    pub n_layer: usize,
    pub n_embd: usize,
    pub n_head: usize,
    pub mlp_internal_dim_multiplier: usize,
    pub vocab_size: usize,
    pub rope_theta: f32,
    pub relu_threshold: f32,
    pub rotary_embedding: RotaryEmbedding,
}

impl Default for BDHConfig {
    fn default() -> Self {
        Self {
            n_layer: 6,
            n_embd: 256,
            n_head: 4,
            mlp_internal_dim_multiplier: 128,
            vocab_size: 256,
            rope_theta: 65_536.0,
            relu_threshold: 0.0,
            rotary_embedding: RotaryEmbedding::default(),
        }
    }
}

impl BDHConfig {
    pub fn validate(&self) -> ProbeResult<()> {
        if self.n_layer == 0 || self.n_embd == 0 || self.n_head == 0 || self.vocab_size == 0 {
            return Err(ProbeError::Config(format!(
                "model dimensions must be positive (n_layer={}, n_embd={}, n_head={}, vocab={})",
                self.n_layer, self.n_embd, self.n_head, self.vocab_size
            )));
        }
        let total = self.mlp_internal_dim_multiplier * self.n_embd;
        if total == 0 || !total.is_multiple_of(self.n_head) {
            return Err(ProbeError::Config(format!(
                "latent size {total} must be a positive multiple of n_head {}",
                self.n_head
            )));
        }
        if matches!(self.rotary_embedding, RotaryEmbedding::Rope)
            && !(total / self.n_head).is_multiple_of(2)
        {
            return Err(ProbeError::Config(
                "rope needs an even latent size per head".into(),
            ));
        }
        if !(self.rope_theta.is_finite() && self.rope_theta > 0.0) {
            return Err(ProbeError::Config(format!(
                "rope_theta must be positive, got {}",
                self.rope_theta
            )));
        }
        Ok(())
    }

    pub fn latent_per_head(&self) -> usize {
        (self.mlp_internal_dim_multiplier * self.n_embd) / self.n_head
    }

    pub fn latent_total(&self) -> usize {
        self.latent_per_head() * self.n_head
    }

    /// Resolve a possibly negative layer index (`-1` = last layer).
    pub fn resolve_layer(&self, layer: i64) -> ProbeResult<usize> {
        let n_layer = self.n_layer as i64;
        let resolved = if layer < 0 { n_layer + layer } else { layer };
        if (0..n_layer).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(ProbeError::Config(format!(
                "attention layer {layer} out of range for {n_layer} layers"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_layers_count_from_the_end() {
        let config = BDHConfig {
            n_layer: 3,
            ..Default::default()
        };
        assert_eq!(config.resolve_layer(-1).expect("last"), 2);
        assert_eq!(config.resolve_layer(0).expect("first"), 0);
        assert!(config.resolve_layer(3).is_err());
        assert!(config.resolve_layer(-4).is_err());
    }

    #[test]
    fn rejects_latent_not_divisible_by_heads() {
        let config = BDHConfig {
            n_embd: 3,
            n_head: 2,
            mlp_internal_dim_multiplier: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(BDHConfig::default().validate().is_ok());
    }
}
