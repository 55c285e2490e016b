use anyhow::Result;
use candle::{D, Device, Tensor};
use candle_nn::VarMap;

use dear::{BidirectionalBatch, Direction, ModelConfig, make_model, masks};

const EN_VOCAB: usize = 100;
const KO_VOCAB: usize = 120;

fn config() -> ModelConfig {
    ModelConfig {
        num_layers: 2,
        d_model: 512,
        num_heads: 8,
        ..Default::default()
    }
}

fn tokens(vocab: usize, shape: (usize, usize), device: &Device) -> Result<Tensor> {
    let t = Tensor::rand(1f32, vocab as f32, shape, device)?.floor()?;
    Ok(t.to_dtype(candle::DType::U32)?)
}

#[test]
fn forward_produces_both_directions() -> Result<()> {
    let device = Device::Cpu;
    let config = config();
    let (model, _varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;

    let (batch, text_len, video_len) = (2, 6, 3);
    let en = tokens(EN_VOCAB, (batch, text_len), &device)?;
    let ko = tokens(KO_VOCAB, (batch, text_len), &device)?;
    let video = Tensor::randn(0f32, 1., (batch, video_len, 1024), &device)?;

    let en_src_mask = masks::padding_mask(&en, 0)?;
    let ko_src_mask = masks::padding_mask(&ko, 0)?;
    let en_tgt_mask = masks::target_mask(&en.narrow(1, 0, text_len - 1)?, 0)?;
    let ko_tgt_mask = masks::target_mask(&ko.narrow(1, 0, text_len - 1)?, 0)?;
    let video_mask = masks::full_mask(batch, video_len, &device)?;

    let out = model.forward(
        &BidirectionalBatch {
            en: &en,
            en_src_mask: &en_src_mask,
            en_tgt_mask: &en_tgt_mask,
            ko: &ko,
            ko_src_mask: &ko_src_mask,
            ko_tgt_mask: &ko_tgt_mask,
            video: &video,
            video_mask: &video_mask,
        },
        true,
    )?;

    assert_eq!(out.en2ko.dims(), &[2, 5, KO_VOCAB]);
    assert_eq!(out.ko2en.dims(), &[2, 5, EN_VOCAB]);
    assert_eq!(out.en2ko_action.dims(), &[2, 3, 401]);
    assert_eq!(out.ko2en_action.dims(), &[2, 3, 401]);

    let totals = out
        .en2ko
        .exp()?
        .sum_keepdim(D::Minus1)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    assert!(totals.iter().all(|t| (t - 1.0).abs() < 1e-4));
    Ok(())
}

#[test]
fn encode_and_decode_step_by_step() -> Result<()> {
    let device = Device::Cpu;
    let config = ModelConfig {
        num_layers: 1,
        d_model: 32,
        d_ff: 64,
        num_heads: 4,
        ..Default::default()
    };
    let (model, _varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;

    let ko = tokens(KO_VOCAB, (1, 4), &device)?;
    let ko_mask = masks::padding_mask(&ko, 0)?;
    let video = Tensor::randn(0f32, 1., (1, 2, 1024), &device)?;
    let video_mask = masks::full_mask(1, 2, &device)?;

    let (memory, act_pred) =
        model.encode(&ko, &ko_mask, &video, &video_mask, Direction::KoToEn, false)?;
    assert_eq!(memory.dims(), &[1, 4, 32]);
    assert_eq!(act_pred.dims(), &[1, 2, 401]);

    let prefix = tokens(EN_VOCAB, (1, 3), &device)?;
    let states = model.decode(
        &memory,
        &ko_mask,
        &prefix,
        &masks::subsequent_mask(3, &device)?,
        Direction::KoToEn,
        false,
    )?;
    assert_eq!(states.dims(), &[1, 3, 32]);

    let logits = model
        .generator(Direction::KoToEn.target())
        .inference(&states)?;
    assert_eq!(logits.dims(), &[1, 3, EN_VOCAB]);
    Ok(())
}

fn check_initialisation(varmap: &VarMap) -> Result<()> {
    let data = varmap.data().lock().unwrap();
    assert!(!data.is_empty());

    for (name, var) in data.iter() {
        let values = var.as_tensor().flatten_all()?;
        if var.rank() >= 2 {
            let spread = values.var(0)?.to_scalar::<f32>()?;
            assert!(spread > 0.0, "{name} is degenerate");
        } else {
            let expected = if name.ends_with("norm.weight") { 1.0 } else { 0.0 };
            let values = values.to_vec1::<f32>()?;
            assert!(
                values.iter().all(|&v| v == expected),
                "{name} does not start at {expected}"
            );
        }
    }
    Ok(())
}

#[test]
fn parameters_start_from_xavier_and_defaults() -> Result<()> {
    let device = Device::Cpu;
    let config = ModelConfig {
        num_layers: 2,
        d_model: 32,
        d_ff: 64,
        num_heads: 4,
        ..Default::default()
    };
    let (_model, varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;
    check_initialisation(&varmap)
}

#[test]
fn classifiers_are_shared_or_per_language() -> Result<()> {
    let device = Device::Cpu;
    let count = |shared_classifier: bool| -> Result<usize> {
        let config = ModelConfig {
            num_layers: 3,
            d_model: 16,
            d_ff: 32,
            num_heads: 2,
            shared_classifier,
            ..Default::default()
        };
        let (_model, varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;
        let data = varmap.data().lock().unwrap();
        Ok(data.keys().filter(|name| name.contains(".classifier.")).count())
    };

    assert_eq!(count(true)?, 3);
    assert_eq!(count(false)?, 6);
    Ok(())
}

#[test]
fn layers_own_independent_parameters() -> Result<()> {
    let device = Device::Cpu;
    let config = ModelConfig {
        num_layers: 2,
        d_model: 16,
        d_ff: 32,
        num_heads: 2,
        ..Default::default()
    };
    let (_model, varmap) = make_model(EN_VOCAB, KO_VOCAB, &config, &device)?;
    let data = varmap.data().lock().unwrap();

    let first = data["encoder.layers.0.self_attn.linear_q.weight"].as_tensor();
    let second = data["encoder.layers.1.self_attn.linear_q.weight"].as_tensor();
    let diff = (first - second)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
    assert!(diff > 0.0);
    Ok(())
}

#[test]
fn invalid_head_count_is_rejected() {
    let config = ModelConfig {
        d_model: 512,
        num_heads: 7,
        ..Default::default()
    };
    assert!(make_model(EN_VOCAB, KO_VOCAB, &config, &Device::Cpu).is_err());
}
