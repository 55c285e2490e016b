//! Parameter constructors with Xavier-uniform weights.
//!
//! `candle_nn::linear` and `candle_nn::embedding` default to Kaiming-style
//! initialisation. Every multi-dimensional parameter of the translation model is
//! drawn from `U(-b, b)` with `b = sqrt(6 / (fan_in + fan_out))` instead, biases
//! start at zero. When the `VarBuilder` is backed by loaded tensors the hints are
//! ignored and the stored values are used as is.

use candle::{Result, Tensor};
use candle_nn::{Embedding, Init, Linear, VarBuilder};

pub fn xavier_uniform(fan_out: usize, fan_in: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

pub fn weight(fan_out: usize, fan_in: usize, vb: &VarBuilder) -> Result<Tensor> {
    vb.get_with_hints((fan_out, fan_in), "weight", xavier_uniform(fan_out, fan_in))
}

pub fn linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let ws = weight(out_dim, in_dim, &vb)?;
    let bs = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(ws, Some(bs)))
}

pub fn linear_no_bias(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let ws = weight(out_dim, in_dim, &vb)?;
    Ok(Linear::new(ws, None))
}

pub fn embedding(vocab_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Embedding> {
    let embeddings = weight(vocab_size, hidden_size, &vb)?;
    Ok(Embedding::new(embeddings, hidden_size))
}
