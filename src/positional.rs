use burn::module::{
    AutodiffModule, Content, Devices, Module, ModuleDisplay, ModuleDisplayDefault, ModuleMapper,
    ModuleVisitor,
};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};

/// Positional phase applied to the sparse latent before attention scores are taken.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotaryEmbedding {
    #[default]
    Rope,
    /// Polar variant: softplus magnitudes split into real/imaginary halves,
    /// doubling the latent width seen by the score matmul.
    Pope,
}

impl RotaryEmbedding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rope => "rope",
            Self::Pope => "pope",
        }
    }

    /// Frequency exponent for latent index `idx` out of `latent`.
    pub fn exponent(&self, idx: usize, latent: usize) -> f32 {
        match self {
            Self::Rope => ((idx as f32 / 2.0).floor() * 2.0) / latent as f32,
            Self::Pope => idx as f32 / latent as f32,
        }
    }
}

impl std::fmt::Display for RotaryEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<B: Backend> Module<B> for RotaryEmbedding {
    type Record = ();

    fn collect_devices(&self, devices: Devices<B>) -> Devices<B> {
        devices
    }

    fn fork(self, _device: &B::Device) -> Self {
        self
    }

    fn to_device(self, _device: &B::Device) -> Self {
        self
    }

    fn visit<Visitor: ModuleVisitor<B>>(&self, _visitor: &mut Visitor) {}

    fn map<Mapper: ModuleMapper<B>>(self, _mapper: &mut Mapper) -> Self {
        self
    }

    fn load_record(self, _record: Self::Record) -> Self {
        self
    }

    fn into_record(self) -> Self::Record {}
}

impl<B: AutodiffBackend> AutodiffModule<B> for RotaryEmbedding {
    type InnerModule = RotaryEmbedding;

    fn valid(&self) -> Self::InnerModule {
        *self
    }
}

impl ModuleDisplayDefault for RotaryEmbedding {
    fn content(&self, content: Content) -> Option<Content> {
        content
            .set_top_level_type("RotaryEmbedding")
            .add_formatted(&format!("kind={self}"))
            .optional()
    }
}

impl ModuleDisplay for RotaryEmbedding {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rope_pairs_share_frequencies() {
        let rope = RotaryEmbedding::Rope;
        assert_eq!(rope.exponent(0, 8), rope.exponent(1, 8));
        assert!(rope.exponent(2, 8) > rope.exponent(1, 8));
    }

    #[test]
    fn parses_snake_case_names() {
        let parsed: RotaryEmbedding = serde_json::from_str("\"pope\"").expect("parse");
        assert_eq!(parsed, RotaryEmbedding::Pope);
        assert_eq!(RotaryEmbedding::default().to_string(), "rope");
    }
}
