use anyhow::Result;
use candle::{Device, Tensor};

use dear::{BidirectionalBatch, ModelConfig, make_model, masks};

const EN_VOCAB: usize = 100;
const KO_VOCAB: usize = 120;
const BATCH: usize = 2;
const TEXT_LEN: usize = 6;
const VIDEO_LEN: usize = 3;

fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ModelConfig::from_file(path)?,
        None => ModelConfig::default(),
    };
    let device = Device::cuda_if_available(0)?;
    log::info!("running on {device:?}");

    let (model, _varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;

    let en = Tensor::rand(0f32, EN_VOCAB as f32, (BATCH, TEXT_LEN), &device)?.floor()?;
    let ko = Tensor::rand(0f32, KO_VOCAB as f32, (BATCH, TEXT_LEN), &device)?.floor()?;
    let video = Tensor::randn(0f32, 1., (BATCH, VIDEO_LEN, config.video_dim), &device)?;

    let src_mask = masks::full_mask(BATCH, TEXT_LEN, &device)?;
    let tgt_mask = masks::subsequent_mask(TEXT_LEN - 1, &device)?;
    let video_mask = masks::full_mask(BATCH, VIDEO_LEN, &device)?;

    let out = model.forward(
        &BidirectionalBatch {
            en: &en,
            en_src_mask: &src_mask,
            en_tgt_mask: &tgt_mask,
            ko: &ko,
            ko_src_mask: &src_mask,
            ko_tgt_mask: &tgt_mask,
            video: &video,
            video_mask: &video_mask,
        },
        false,
    )?;

    log::info!("en->ko log-probs {:?}", out.en2ko.shape());
    log::info!("ko->en log-probs {:?}", out.ko2en.shape());
    log::info!("en->ko actions {:?}", out.en2ko_action.shape());
    log::info!("ko->en actions {:?}", out.ko2en_action.shape());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("{e:?}");
    }
}
