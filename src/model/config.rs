use std::path::Path;

use anyhow::{Result, ensure};
use serde::Deserialize;

/// Which text stream an encoder layer feeds into its closing feed-forward sublayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionWiring {
    /// The self-attended text with the pooled video context added.
    #[default]
    VideoConditioned,
    /// The self-attended text only; the video context branch is computed and dropped.
    SelfAttention,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_layers: usize,
    pub d_model: usize,
    pub d_ff: usize,
    pub num_heads: usize,
    pub dropout: f32,
    pub shared_classifier: bool,
    pub num_actions: usize,
    pub video_dim: usize,
    pub max_len: usize,
    pub fusion_wiring: FusionWiring,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_layers: 6,
            d_model: 512,
            d_ff: 2048,
            num_heads: 8,
            dropout: 0.1,
            shared_classifier: false,
            num_actions: 401,
            video_dim: 1024,
            max_len: 5000,
            fusion_wiring: FusionWiring::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_heads > 0, "num_heads must be positive");
        ensure!(
            self.d_model % self.num_heads == 0,
            "d_model ({}) is not divisible by num_heads ({})",
            self.d_model,
            self.num_heads
        );
        ensure!(self.d_model % 2 == 0, "d_model ({}) must be even", self.d_model);
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "dropout ({}) must be in [0, 1)",
            self.dropout
        );
        ensure!(self.num_layers > 0, "num_layers must be positive");
        Ok(())
    }
}
