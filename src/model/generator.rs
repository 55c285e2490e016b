use candle::{D, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::common::{init, tensor_ext::TensorExt};

/// Projection from the model width to vocabulary scores.
pub struct Generator {
    proj: Linear,
}

impl Module for Generator {
    /// Log-probabilities over the vocabulary.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.proj.forward(x)?.log_softmax(D::Minus1)
    }
}

impl Generator {
    pub fn new(d_model: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let proj = init::linear(d_model, vocab_size, vb.pp("proj"))?;
        Ok(Self { proj })
    }

    /// Unnormalised logits, for search and sampling.
    pub fn inference(&self, x: &Tensor) -> Result<Tensor> {
        self.proj.forward(x)
    }
}
