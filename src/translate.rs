use anyhow::Result;
use candle::{D, IndexOp, Tensor};

use crate::{
    common::tensor_ext::TensorExt,
    masks,
    model::{EncoderDecoder, direction::Direction},
};

#[derive(Debug, Clone, Copy)]
pub struct GreedyConfig {
    pub start_symbol: u32,
    pub end_symbol: u32,
    /// Upper bound on the decoded length, start symbol included.
    pub max_len: usize,
}

/// Greedy autoregressive translation of a batch. The source is encoded once, then
/// the decoder is rerun on the growing prefix and the highest-scoring token is
/// appended until every row produced `end_symbol` or `max_len` is reached.
///
/// Returns one token sequence per batch row, without the start and end symbols.
pub fn greedy_decode(
    model: &EncoderDecoder,
    src: &Tensor,
    src_mask: &Tensor,
    video: &Tensor,
    video_mask: &Tensor,
    direction: Direction,
    config: &GreedyConfig,
) -> Result<Vec<Vec<u32>>> {
    let device = src.device();
    let (memory, _) = model.encode(src, src_mask, video, video_mask, direction, false)?;
    let generator = model.generator(direction.target());

    let batch = src.size(0);
    let mut ys = vec![vec![config.start_symbol]; batch];
    let mut finished = vec![false; batch];

    for _ in 1..config.max_len {
        let len = ys[0].len();
        let tokens = Tensor::new(ys.concat(), device)?.reshape((batch, len))?;
        let tgt_mask = masks::subsequent_mask(len, device)?;

        let out = model.decode(&memory, src_mask, &tokens, &tgt_mask, direction, false)?;
        let logits = generator.inference(&out.i((.., len - 1))?)?;
        let next = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;

        for ((row, done), token) in ys.iter_mut().zip(finished.iter_mut()).zip(next) {
            if *done {
                row.push(config.end_symbol);
            } else {
                row.push(token);
                *done = token == config.end_symbol;
            }
        }

        if finished.iter().all(|&done| done) {
            break;
        }
    }
    log::debug!("greedy decode stopped at length {}", ys[0].len());

    Ok(ys
        .into_iter()
        .map(|row| {
            row.into_iter()
                .skip(1)
                .take_while(|&token| token != config.end_symbol)
                .collect()
        })
        .collect())
}
