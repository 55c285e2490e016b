use candle::{D, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::{
    common::{init, tensor_ext::TensorExt},
    model::direction::{Direction, Language},
};

/// Auxiliary action classifier over the text-conditioned video stream.
pub enum ActionClassifier {
    Shared(Linear),
    PerLanguage { en: Linear, ko: Linear },
}

impl ActionClassifier {
    pub fn new(d_model: usize, num_actions: usize, shared: bool, vb: VarBuilder) -> Result<Self> {
        if shared {
            let classifier = init::linear_no_bias(d_model, num_actions, vb.pp("shared"))?;
            Ok(Self::Shared(classifier))
        } else {
            let en = init::linear_no_bias(d_model, num_actions, vb.pp("en"))?;
            let ko = init::linear_no_bias(d_model, num_actions, vb.pp("ko"))?;
            Ok(Self::PerLanguage { en, ko })
        }
    }

    /// Log-probabilities over actions for every position of `x`.
    pub fn forward(&self, x: &Tensor, direction: Direction) -> Result<Tensor> {
        let classifier = match self {
            Self::Shared(classifier) => classifier,
            Self::PerLanguage { en, ko } => match direction.source() {
                Language::En => en,
                Language::Ko => ko,
            },
        };
        classifier.forward(x)?.log_softmax(D::Minus1)
    }
}
