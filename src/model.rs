pub mod attention;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod direction;
pub mod embedding;
pub mod encoder;
pub mod feed_forward;
pub mod generator;
pub mod norm;

use anyhow::Result;
use candle::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::{
    common::tensor_ext::TensorExt,
    model::{
        config::ModelConfig,
        decoder::Decoder,
        direction::{Direction, Language},
        embedding::{TextEmbedding, VideoEncoder},
        encoder::Encoder,
        generator::Generator,
    },
};

/// One aligned English/Korean batch with its video clip, as consumed by
/// [`EncoderDecoder::forward`]. Target masks cover the shifted targets, i.e. one
/// position shorter than the token sequences.
pub struct BidirectionalBatch<'a> {
    pub en: &'a Tensor,
    pub en_src_mask: &'a Tensor,
    pub en_tgt_mask: &'a Tensor,
    pub ko: &'a Tensor,
    pub ko_src_mask: &'a Tensor,
    pub ko_tgt_mask: &'a Tensor,
    pub video: &'a Tensor,
    pub video_mask: &'a Tensor,
}

#[derive(Debug)]
pub struct BidirectionalOutput {
    pub en2ko: Tensor,
    pub ko2en: Tensor,
    pub en2ko_action: Tensor,
    pub ko2en_action: Tensor,
}

/// Video-conditioned English/Korean translation model. The encoder, decoder and
/// video encoder are shared by both directions; embeddings and generators are per
/// language.
pub struct EncoderDecoder {
    en_embed: TextEmbedding,
    ko_embed: TextEmbedding,
    vid_encoder: VideoEncoder,
    encoder: Encoder,
    decoder: Decoder,
    en_generator: Generator,
    ko_generator: Generator,
}

impl EncoderDecoder {
    pub fn new(
        en_vocab: usize,
        ko_vocab: usize,
        config: &ModelConfig,
        vb: VarBuilder,
    ) -> candle::Result<Self> {
        let (d_model, dropout, max_len) = (config.d_model, config.dropout, config.max_len);

        let en_embed = TextEmbedding::new(d_model, en_vocab, dropout, max_len, vb.pp("en_embed"))?;
        let ko_embed = TextEmbedding::new(d_model, ko_vocab, dropout, max_len, vb.pp("ko_embed"))?;
        let vid_encoder =
            VideoEncoder::new(config.video_dim, d_model, dropout, max_len, vb.pp("vid_encoder"))?;
        let encoder = Encoder::new(config, vb.pp("encoder"))?;
        let decoder = Decoder::new(config, vb.pp("decoder"))?;
        let en_generator = Generator::new(d_model, en_vocab, vb.pp("en_generator"))?;
        let ko_generator = Generator::new(d_model, ko_vocab, vb.pp("ko_generator"))?;

        Ok(Self {
            en_embed,
            ko_embed,
            vid_encoder,
            encoder,
            decoder,
            en_generator,
            ko_generator,
        })
    }

    fn embed(&self, language: Language) -> &TextEmbedding {
        match language {
            Language::En => &self.en_embed,
            Language::Ko => &self.ko_embed,
        }
    }

    pub fn generator(&self, language: Language) -> &Generator {
        match language {
            Language::En => &self.en_generator,
            Language::Ko => &self.ko_generator,
        }
    }

    pub fn vid_encode(&self, video: &Tensor, train: bool) -> candle::Result<Tensor> {
        self.vid_encoder.forward(video, train)
    }

    /// Encodes source tokens of `direction`'s source language against the video.
    /// Returns the memory and the action log-probabilities.
    pub fn encode(
        &self,
        tokens: &Tensor,
        mask: &Tensor,
        video: &Tensor,
        video_mask: &Tensor,
        direction: Direction,
        train: bool,
    ) -> candle::Result<(Tensor, Tensor)> {
        let x = self.embed(direction.source()).forward(tokens, train)?;
        let video = self.vid_encode(video, train)?;
        self.encoder
            .forward(&x, mask, &video, video_mask, direction, train)
    }

    /// Decodes target-language tokens against the encoder memory, returning the
    /// decoder states (batch, tgt_len, d_model).
    pub fn decode(
        &self,
        memory: &Tensor,
        memory_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        direction: Direction,
        train: bool,
    ) -> candle::Result<Tensor> {
        let tgt = self.embed(direction.target()).forward(tgt, train)?;
        self.decoder
            .forward(&tgt, memory, memory_mask, tgt_mask, train)
    }

    /// Both translation directions with teacher forcing; the outputs are the
    /// decoder states.
    pub fn forward_hidden(
        &self,
        batch: &BidirectionalBatch,
        train: bool,
    ) -> candle::Result<BidirectionalOutput> {
        let (en_memory, en2ko_action) = self.encode(
            batch.en,
            batch.en_src_mask,
            batch.video,
            batch.video_mask,
            Direction::EnToKo,
            train,
        )?;
        let en2ko = self.decode(
            &en_memory,
            batch.en_src_mask,
            &shift_right(batch.ko)?,
            batch.ko_tgt_mask,
            Direction::EnToKo,
            train,
        )?;

        let (ko_memory, ko2en_action) = self.encode(
            batch.ko,
            batch.ko_src_mask,
            batch.video,
            batch.video_mask,
            Direction::KoToEn,
            train,
        )?;
        let ko2en = self.decode(
            &ko_memory,
            batch.ko_src_mask,
            &shift_right(batch.en)?,
            batch.en_tgt_mask,
            Direction::KoToEn,
            train,
        )?;

        Ok(BidirectionalOutput {
            en2ko,
            ko2en,
            en2ko_action,
            ko2en_action,
        })
    }

    /// Like [`Self::forward_hidden`], with the decoder states turned into
    /// vocabulary log-probabilities of the respective target language.
    pub fn forward(
        &self,
        batch: &BidirectionalBatch,
        train: bool,
    ) -> candle::Result<BidirectionalOutput> {
        let out = self.forward_hidden(batch, train)?;
        Ok(BidirectionalOutput {
            en2ko: self.generator(Language::Ko).forward(&out.en2ko)?,
            ko2en: self.generator(Language::En).forward(&out.ko2en)?,
            ..out
        })
    }
}

/// Decoder input for teacher forcing: every token but the last.
fn shift_right(tokens: &Tensor) -> candle::Result<Tensor> {
    let len = tokens.size(1);
    if len < 2 {
        candle::bail!("target sequences need at least two tokens, got {len}");
    }
    tokens.narrow(1, 0, len - 1)
}

/// Builds a randomly initialised model. `src_vocab` is the English vocabulary
/// size and `tgt_vocab` the Korean one. The returned `VarMap` holds every
/// trainable variable.
pub fn make_model(
    src_vocab: usize,
    tgt_vocab: usize,
    config: &ModelConfig,
    device: &Device,
) -> Result<(EncoderDecoder, VarMap)> {
    config.validate()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = EncoderDecoder::new(src_vocab, tgt_vocab, config, vb)?;

    let vars = varmap.all_vars();
    let params: usize = vars.iter().map(|var| var.elem_count()).sum();
    log::info!(
        "built model: {} layers, d_model {}, {} heads, {} tensors, {} parameters",
        config.num_layers,
        config.d_model,
        config.num_heads,
        vars.len(),
        params
    );

    Ok((model, varmap))
}
