use candle::{Module, Result, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

use crate::common::init;

pub struct PositionwiseFeedForward {
    w_1: Linear,
    w_2: Linear,
    dropout: Dropout,
}

impl PositionwiseFeedForward {
    pub fn new(
        d_model: usize,
        d_ff: usize,
        d_out: Option<usize>,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let w_1 = init::linear(d_model, d_ff, vb.pp("w_1"))?;
        let w_2 = init::linear(d_ff, d_out.unwrap_or(d_model), vb.pp("w_2"))?;

        Ok(Self {
            w_1,
            w_2,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.w_1.forward(x)?.relu()?;
        let x = self.dropout.forward(&x, train)?;
        self.w_2.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn output_width_follows_d_out() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let same = PositionwiseFeedForward::new(16, 64, None, 0.1, vb.pp("same"))?;
        let wide = PositionwiseFeedForward::new(16, 64, Some(24), 0.1, vb.pp("wide"))?;

        let x = Tensor::randn(0f32, 1., (2, 3, 16), &device)?;
        assert_eq!(same.forward(&x, true)?.dims(), &[2, 3, 16]);
        assert_eq!(wide.forward(&x, false)?.dims(), &[2, 3, 24]);
        Ok(())
    }
}
