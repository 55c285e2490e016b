use candle::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{Dropout, Embedding, Linear, VarBuilder};

use crate::common::{init, tensor_ext::TensorExt};

const MAX_TIMESCALE: f64 = 10000.0;

/// Token lookup scaled by `sqrt(d_model)`.
pub struct Embeddings {
    lut: Embedding,
    scale: f64,
}

impl Module for Embeddings {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.lut
            .forward(&x.to_dtype(DType::U32)?)?
            .scalar_mul(self.scale)
    }
}

impl Embeddings {
    pub fn new(d_model: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let lut = init::embedding(vocab_size, d_model, vb.pp("lut"))?;

        Ok(Self {
            lut,
            scale: (d_model as f64).sqrt(),
        })
    }

    pub fn embeddings(&self) -> &Tensor {
        self.lut.embeddings()
    }
}

/// Fixed sinusoidal position signal, sine on even channels and cosine on odd ones.
pub struct PositionalEncoding {
    pe: Tensor,
    dropout: Dropout,
}

impl PositionalEncoding {
    pub fn new(d_model: usize, dropout: f32, max_len: usize, device: &Device) -> Result<Self> {
        let position = Tensor::arange(0, max_len as i64, device)?
            .float()?
            .unsqueeze(1)?;
        let div_term = Tensor::arange_step(0, d_model as i64, 2, device)?
            .float()?
            .scalar_mul(-MAX_TIMESCALE.ln() / d_model as f64)?
            .exp()?;

        let angles = position.broadcast_mul(&div_term.unsqueeze(0)?)?;
        let pe = Tensor::stack(&[angles.sin()?, angles.cos()?], 2)?
            .reshape((max_len, d_model))?
            .unsqueeze(0)?;

        Ok(Self {
            pe,
            dropout: Dropout::new(dropout),
        })
    }

    /// The precomputed (1, max_len, d_model) table.
    pub fn table(&self) -> &Tensor {
        &self.pe
    }

    /// Accepts (batch, time, d_model) or an unbatched (time, d_model), which is
    /// treated as a batch of one.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = match x.rank() {
            2 => x.unsqueeze(0)?,
            _ => x.clone(),
        };
        let time = x.size(1);
        let x = x.broadcast_add(&self.pe.i((.., ..time))?)?;
        self.dropout.forward(&x, train)
    }
}

/// Token embedding followed by the position signal, one per language.
pub struct TextEmbedding {
    lut: Embeddings,
    position: PositionalEncoding,
}

impl TextEmbedding {
    pub fn new(
        d_model: usize,
        vocab_size: usize,
        dropout: f32,
        max_len: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let position = PositionalEncoding::new(d_model, dropout, max_len, vb.device())?;
        let lut = Embeddings::new(d_model, vocab_size, vb)?;
        Ok(Self { lut, position })
    }

    pub fn forward(&self, tokens: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.lut.forward(tokens)?;
        self.position.forward(&x, train)
    }
}

/// Projects per-frame video features into the model width: linear, ReLU, positions.
pub struct VideoEncoder {
    proj: Linear,
    position: PositionalEncoding,
}

impl VideoEncoder {
    pub fn new(
        video_dim: usize,
        d_model: usize,
        dropout: f32,
        max_len: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let proj = init::linear(video_dim, d_model, vb.pp("proj"))?;
        let position = PositionalEncoding::new(d_model, dropout, max_len, vb.device())?;
        Ok(Self { proj, position })
    }

    pub fn forward(&self, video: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.proj.forward(video)?.relu()?;
        self.position.forward(&x, train)
    }
}
