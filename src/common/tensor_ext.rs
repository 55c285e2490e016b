use candle::{DType, Result, Tensor, shape::Dim};

pub trait TensorExt {
    fn size(&self, dim: usize) -> usize;
    fn float(&self) -> Result<Tensor>;
    fn scalar_mul(&self, value: f64) -> Result<Tensor>;
    fn scalar_div(&self, value: f64) -> Result<Tensor>;
    fn softmax<D: Dim>(&self, dim: D) -> Result<Tensor>;
    fn log_softmax<D: Dim>(&self, dim: D) -> Result<Tensor>;
    /// Replaces every element whose `mask` entry is zero with `value`.
    /// The mask is broadcast to the shape of `self`.
    fn masked_fill(&self, mask: &Tensor, value: f64) -> Result<Tensor>;
}

impl TensorExt for Tensor {
    fn size(&self, dim: usize) -> usize {
        self.dims()[dim]
    }

    fn float(&self) -> Result<Tensor> {
        self.to_dtype(DType::F32)
    }

    fn scalar_mul(&self, value: f64) -> Result<Tensor> {
        self * value
    }

    fn scalar_div(&self, value: f64) -> Result<Tensor> {
        self / value
    }

    fn softmax<D: Dim>(&self, dim: D) -> Result<Tensor> {
        candle_nn::ops::softmax(self, dim)
    }

    fn log_softmax<D: Dim>(&self, dim: D) -> Result<Tensor> {
        candle_nn::ops::log_softmax(self, dim)
    }

    fn masked_fill(&self, mask: &Tensor, value: f64) -> Result<Tensor> {
        let mask = mask.to_dtype(DType::U8)?.broadcast_as(self.shape())?;
        let fill = Tensor::full(value, self.shape(), self.device())?.to_dtype(self.dtype())?;
        mask.where_cond(self, &fill)
    }
}
