//! Attention masks. A mask entry of 1 marks a visible key position, 0 a blocked one.

use candle::{DType, Device, Result, Tensor};

/// Hides padding tokens. `tokens` is (batch, time), the mask is (batch, 1, time).
pub fn padding_mask(tokens: &Tensor, pad: u32) -> Result<Tensor> {
    tokens.ne(pad)?.unsqueeze(1)
}

/// Causal visibility for decoder self-attention, shape (1, size, size):
/// query position `i` sees key positions `0..=i`.
pub fn subsequent_mask(size: usize, device: &Device) -> Result<Tensor> {
    Tensor::tril2(size, DType::U8, device)?.unsqueeze(0)
}

/// Padding and causal masks combined, shape (batch, time, time).
pub fn target_mask(tokens: &Tensor, pad: u32) -> Result<Tensor> {
    let (_batch, time) = tokens.dims2()?;
    let padding = padding_mask(tokens, pad)?;
    padding.broadcast_mul(&subsequent_mask(time, tokens.device())?)
}

/// Every frame of every clip is valid, shape (batch, 1, frames).
pub fn full_mask(batch: usize, frames: usize, device: &Device) -> Result<Tensor> {
    Tensor::ones((batch, 1, frames), DType::U8, device)
}
