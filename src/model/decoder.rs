use candle::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::model::{
    attention::MultiHeadedAttention,
    config::ModelConfig,
    feed_forward::PositionwiseFeedForward,
    norm::{LayerNorm, SublayerConnection},
};

pub struct DecoderLayer {
    self_attn: MultiHeadedAttention,
    src_attn: MultiHeadedAttention,
    feed_forward: PositionwiseFeedForward,
    self_attn_sublayer: SublayerConnection,
    src_attn_sublayer: SublayerConnection,
    feed_forward_sublayer: SublayerConnection,
}

impl DecoderLayer {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let (h, d_model, dropout) = (config.num_heads, config.d_model, config.dropout);
        let self_attn = MultiHeadedAttention::new(h, d_model, None, dropout, vb.pp("self_attn"))?;
        let src_attn = MultiHeadedAttention::new(h, d_model, None, dropout, vb.pp("src_attn"))?;
        let feed_forward = PositionwiseFeedForward::new(
            d_model,
            config.d_ff,
            None,
            dropout,
            vb.pp("feed_forward"),
        )?;

        Ok(Self {
            self_attn,
            src_attn,
            feed_forward,
            self_attn_sublayer: SublayerConnection::new(d_model, dropout, vb.pp("sublayer.0"))?,
            src_attn_sublayer: SublayerConnection::new(d_model, dropout, vb.pp("sublayer.1"))?,
            feed_forward_sublayer: SublayerConnection::new(d_model, dropout, vb.pp("sublayer.2"))?,
        })
    }

    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let x = self.self_attn_sublayer.forward(x, train, |x| {
            self.self_attn.forward(x, x, x, Some(tgt_mask), train)
        })?;
        let x = self.src_attn_sublayer.forward(&x, train, |x| {
            self.src_attn.forward(x, memory, memory, Some(src_mask), train)
        })?;
        self.feed_forward_sublayer
            .forward(&x, train, |x| self.feed_forward.forward(x, train))
    }
}

pub struct Decoder {
    layers: Vec<DecoderLayer>,
    norm: LayerNorm,
}

impl Decoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let layers: Vec<_> = (0..config.num_layers)
            .map(|i| DecoderLayer::new(config, vb.pp(format!("layers.{i}"))))
            .collect::<Result<_>>()?;
        let norm = LayerNorm::new(config.d_model, vb.pp("norm"))?;

        Ok(Self { layers, norm })
    }

    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, memory, src_mask, tgt_mask, train)?;
        }
        self.norm.forward(&x)
    }
}
