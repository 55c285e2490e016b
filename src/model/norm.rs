use candle::{D, Module, Result, Tensor};
use candle_nn::{Dropout, Init, VarBuilder};

const EPS: f64 = 1e-6;

/// Layer normalisation with the epsilon added to the (unbiased) standard deviation
/// rather than to the variance, unlike `candle_nn::LayerNorm`.
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let std = x.var_keepdim(D::Minus1)?.sqrt()?;
        x.broadcast_sub(&mean)?
            .broadcast_div(&(std + self.eps)?)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

impl LayerNorm {
    pub fn new(features: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(features, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(features, "bias", Init::Const(0.0))?;

        Ok(Self {
            weight,
            bias,
            eps: EPS,
        })
    }
}

/// Pre-norm residual wrapper around an attention or feed-forward sublayer.
pub struct SublayerConnection {
    norm: LayerNorm,
    dropout: Dropout,
}

impl SublayerConnection {
    pub fn new(size: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let norm = LayerNorm::new(size, vb.pp("norm"))?;

        Ok(Self {
            norm,
            dropout: Dropout::new(dropout),
        })
    }

    /// `x + dropout(sublayer(norm(x)))`
    pub fn forward<F>(&self, x: &Tensor, train: bool, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let out = self.nosum_forward(x, train, sublayer)?;
        x + out
    }

    /// Adds the time-averaged sublayer output to every position of `x`.
    pub fn expand_forward<F>(&self, x: &Tensor, train: bool, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let out = self.nosum_forward(x, train, sublayer)?;
        let out = out.mean_keepdim(1)?.broadcast_as(x.shape())?;
        x + out
    }

    /// Sublayer output alone, without the residual.
    pub fn nosum_forward<F>(&self, x: &Tensor, train: bool, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let out = sublayer(&self.norm.forward(x)?)?;
        self.dropout.forward(&out, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device};
    use candle_nn::VarMap;

    fn connection(size: usize) -> Result<SublayerConnection> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        SublayerConnection::new(size, 0.1, vb)
    }

    #[test]
    fn layer_norm_standardises_the_last_axis() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = LayerNorm::new(4, vb)?;

        let x = Tensor::new(&[[1f32, 2., 3., 4.], [10., 10., 10., 14.]], &Device::Cpu)?;
        let y = norm.forward(&x)?;
        let mean = y.mean_keepdim(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        let std = y.var_keepdim(D::Minus1)?.sqrt()?.flatten_all()?.to_vec1::<f32>()?;
        for (m, s) in mean.iter().zip(std.iter()) {
            assert!(m.abs() < 1e-5);
            assert!((s - 1.0).abs() < 1e-4);
        }
        Ok(())
    }

    #[test]
    fn expand_forward_adds_the_pooled_context_everywhere() -> Result<()> {
        let sublayer = connection(2)?;
        let x = Tensor::zeros((1, 3, 2), DType::F32, &Device::Cpu)?;
        let context = Tensor::new(&[[[1f32, 0.], [2., 0.], [6., 3.]]], &Device::Cpu)?;

        let y = sublayer.expand_forward(&x, false, |_| Ok(context.clone()))?;
        assert_eq!(
            y.to_vec3::<f32>()?,
            vec![vec![vec![3., 1.], vec![3., 1.], vec![3., 1.]]]
        );
        Ok(())
    }

    #[test]
    fn nosum_forward_drops_the_residual() -> Result<()> {
        let sublayer = connection(2)?;
        let x = Tensor::ones((1, 2, 2), DType::F32, &Device::Cpu)?;

        let summed = sublayer.forward(&x, false, |h| h.zeros_like())?;
        let alone = sublayer.nosum_forward(&x, false, |h| h.zeros_like())?;
        assert_eq!(summed.to_vec3::<f32>()?, x.to_vec3::<f32>()?);
        assert_eq!(alone.to_vec3::<f32>()?, vec![vec![vec![0., 0.]; 2]]);
        Ok(())
    }
}
