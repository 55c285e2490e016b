use candle::{D, Module, Result, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

use crate::common::{init, tensor_ext::TensorExt};

const MASK_VALUE: f64 = -1e9;

/// Scaled dot-product attention over the last two axes.
///
/// `mask` must broadcast to (..., time_q, time_k); keys whose mask entry is zero
/// receive no weight. Returns the attended values together with the attention
/// distribution.
pub fn attention(
    query: &Tensor,
    key: &Tensor,
    value: &Tensor,
    mask: Option<&Tensor>,
    dropout: Option<&Dropout>,
    train: bool,
) -> Result<(Tensor, Tensor)> {
    let d_k = query.dim(D::Minus1)?;
    let mut scores = query
        .matmul(&key.transpose(D::Minus2, D::Minus1)?)?
        .scalar_div((d_k as f64).sqrt())?;

    if let Some(mask) = mask {
        scores = scores.masked_fill(mask, MASK_VALUE)?;
    }

    let mut p_attn = scores.softmax(D::Minus1)?;
    if let Some(dropout) = dropout {
        p_attn = dropout.forward(&p_attn, train)?;
    }

    Ok((p_attn.matmul(value)?, p_attn))
}

pub struct MultiHeadedAttention {
    h: usize,
    d_k: usize,
    linear_q: Linear,
    linear_k: Linear,
    linear_v: Linear,
    linear_out: Linear,
    dropout: Dropout,
}

impl MultiHeadedAttention {
    /// `d_in` is the feature width of the inputs and of the output; it defaults to
    /// `d_model`, the width attention is computed in.
    pub fn new(
        h: usize,
        d_model: usize,
        d_in: Option<usize>,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if h == 0 || d_model % h != 0 {
            candle::bail!("d_model ({d_model}) must be divisible by the head count ({h})");
        }
        let d_in = d_in.unwrap_or(d_model);

        let linear_q = init::linear(d_in, d_model, vb.pp("linear_q"))?;
        let linear_k = init::linear(d_in, d_model, vb.pp("linear_k"))?;
        let linear_v = init::linear(d_in, d_model, vb.pp("linear_v"))?;
        let linear_out = init::linear(d_model, d_in, vb.pp("linear_out"))?;

        Ok(Self {
            h,
            d_k: d_model / h,
            linear_q,
            linear_k,
            linear_v,
            linear_out,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        // one mask for every head
        let mask = mask.map(|mask| mask.unsqueeze(1)).transpose()?;
        let n_batch = query.size(0);

        let q = self.split_heads(&self.linear_q, query)?;
        let k = self.split_heads(&self.linear_k, key)?;
        let v = self.split_heads(&self.linear_v, value)?;

        let (x, _) = attention(&q, &k, &v, mask.as_ref(), Some(&self.dropout), train)?;
        let x = x
            .transpose(1, 2)?
            .reshape((n_batch, (), self.h * self.d_k))?;

        self.linear_out.forward(&x)
    }

    fn split_heads(&self, linear: &Linear, x: &Tensor) -> Result<Tensor> {
        let b = x.size(0);
        linear
            .forward(x)?
            .reshape((b, (), self.h, self.d_k))?
            .transpose(1, 2)?
            .contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    #[test]
    fn masked_keys_get_no_weight() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1., (2, 4, 8), &device)?;
        let k = Tensor::randn(0f32, 1., (2, 6, 8), &device)?;
        let v = Tensor::randn(0f32, 1., (2, 6, 8), &device)?;
        let mask = Tensor::new(&[[[1u8, 1, 1, 1, 0, 0]], [[1, 0, 1, 0, 1, 0]]], &device)?;

        let (out, p_attn) = attention(&q, &k, &v, Some(&mask), None, false)?;
        assert_eq!(out.dims(), &[2, 4, 8]);

        let p = p_attn.to_vec3::<f32>()?;
        let masks = mask.to_vec3::<u8>()?;
        for (b, rows) in p.iter().enumerate() {
            for row in rows {
                let total: f32 = row.iter().sum();
                assert!((total - 1.0).abs() < 1e-5);
                for (j, &w) in row.iter().enumerate() {
                    if masks[b][0][j] == 0 {
                        assert!(w < 1e-6, "masked key {j} got weight {w}");
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn heads_preserve_batch_and_time() -> Result<()> {
        let device = Device::Cpu;
        for (h, d_model) in [(1, 8), (2, 8), (4, 16), (8, 64)] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let mha = MultiHeadedAttention::new(h, d_model, None, 0.1, vb)?;

            let x = Tensor::randn(0f32, 1., (2, 5, d_model), &device)?;
            let mem = Tensor::randn(0f32, 1., (2, 3, d_model), &device)?;
            let y = mha.forward(&x, &mem, &mem, None, true)?;
            assert_eq!(y.dims(), &[2, 5, d_model]);
        }
        Ok(())
    }

    #[test]
    fn distinct_input_width_is_kept_at_the_output() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiHeadedAttention::new(4, 16, Some(12), 0.0, vb)?;

        let x = Tensor::randn(0f32, 1., (3, 7, 12), &device)?;
        let mask = Tensor::ones((3, 1, 7), DType::U8, &device)?;
        let y = mha.forward(&x, &x, &x, Some(&mask), false)?;
        assert_eq!(y.dims(), &[3, 7, 12]);
        assert_eq!(y.i((0, 0))?.dims(), &[12]);
        Ok(())
    }

    #[test]
    fn indivisible_head_count_fails() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(MultiHeadedAttention::new(3, 16, None, 0.1, vb).is_err());
    }
}
