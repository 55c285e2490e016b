use candle::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::model::{
    attention::MultiHeadedAttention,
    classifier::ActionClassifier,
    config::{FusionWiring, ModelConfig},
    direction::Direction,
    feed_forward::PositionwiseFeedForward,
    norm::{LayerNorm, SublayerConnection},
};

/// Text self-attention fused with the video stream in both directions.
pub struct EncoderLayer {
    self_attn: MultiHeadedAttention,
    vid_attn: MultiHeadedAttention,
    seq_attn: MultiHeadedAttention,
    ff1: PositionwiseFeedForward,
    ff2: PositionwiseFeedForward,
    self_attn_sublayer: SublayerConnection,
    vid_attn_sublayer: SublayerConnection,
    seq_attn_sublayer: SublayerConnection,
    ff2_sublayer: SublayerConnection,
    ff1_sublayer: SublayerConnection,
    classifier: ActionClassifier,
    fusion_wiring: FusionWiring,
}

impl EncoderLayer {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let attn = |name: &str| {
            MultiHeadedAttention::new(
                config.num_heads,
                config.d_model,
                None,
                config.dropout,
                vb.pp(name),
            )
        };
        let ff = |name: &str| {
            PositionwiseFeedForward::new(
                config.d_model,
                config.d_ff,
                None,
                config.dropout,
                vb.pp(name),
            )
        };
        let sublayer = |i: usize| {
            SublayerConnection::new(config.d_model, config.dropout, vb.pp(format!("sublayer.{i}")))
        };

        Ok(Self {
            self_attn: attn("self_attn")?,
            vid_attn: attn("vid_attn")?,
            seq_attn: attn("seq_attn")?,
            ff1: ff("ff1")?,
            ff2: ff("ff2")?,
            self_attn_sublayer: sublayer(0)?,
            vid_attn_sublayer: sublayer(1)?,
            seq_attn_sublayer: sublayer(2)?,
            ff2_sublayer: sublayer(3)?,
            ff1_sublayer: sublayer(4)?,
            classifier: ActionClassifier::new(
                config.d_model,
                config.num_actions,
                config.shared_classifier,
                vb.pp("classifier"),
            )?,
            fusion_wiring: config.fusion_wiring,
        })
    }

    /// Returns the refined text (batch, text_len, d_model) and the action
    /// log-probabilities (batch, video_len, num_actions).
    pub fn forward(
        &self,
        seq: &Tensor,
        seq_mask: &Tensor,
        video: &Tensor,
        video_mask: &Tensor,
        direction: Direction,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let seq = self.self_attn_sublayer.forward(seq, train, |x| {
            self.self_attn.forward(x, x, x, Some(seq_mask), train)
        })?;
        let vid_seq = self.vid_attn_sublayer.expand_forward(&seq, train, |x| {
            self.vid_attn.forward(x, video, video, Some(video_mask), train)
        })?;

        let seq_vid = self.seq_attn_sublayer.nosum_forward(video, train, |x| {
            self.seq_attn.forward(x, &seq, &seq, Some(seq_mask), train)
        })?;
        let seq_vid = self
            .ff2_sublayer
            .forward(&seq_vid, train, |x| self.ff2.forward(x, train))?;
        let act_pred = self.classifier.forward(&seq_vid, direction)?;

        let carried = match self.fusion_wiring {
            FusionWiring::VideoConditioned => &vid_seq,
            FusionWiring::SelfAttention => &seq,
        };
        let out = self
            .ff1_sublayer
            .forward(carried, train, |x| self.ff1.forward(x, train))?;

        Ok((out, act_pred))
    }
}

pub struct Encoder {
    layers: Vec<EncoderLayer>,
    norm: LayerNorm,
}

impl Encoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let layers: Vec<_> = (0..config.num_layers)
            .map(|i| EncoderLayer::new(config, vb.pp(format!("layers.{i}"))))
            .collect::<Result<_>>()?;
        let norm = LayerNorm::new(config.d_model, vb.pp("norm"))?;

        Ok(Self { layers, norm })
    }

    /// Encodes the embedded text against the embedded video. Only the last
    /// layer's action prediction is returned.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        video: &Tensor,
        video_mask: &Tensor,
        direction: Direction,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let mut x = x.clone();
        let mut act_pred = None;
        for layer in &self.layers {
            let (out, pred) = layer.forward(&x, mask, video, video_mask, direction, train)?;
            x = out;
            act_pred = Some(pred);
        }

        let Some(act_pred) = act_pred else {
            candle::bail!("encoder has no layers");
        };
        Ok((self.norm.forward(&x)?, act_pred))
    }
}
