pub mod common;
pub mod masks;
pub mod model;
pub mod translate;

pub use model::{
    BidirectionalBatch, BidirectionalOutput, EncoderDecoder, make_model,
    config::{FusionWiring, ModelConfig},
    direction::{Direction, Language},
};
