//! End-to-end conversion tests over a Flux-style key-set list

use candle_core::{Device, Tensor};
use loramap::{convert, map_prefix_range_bounded, Convention, Error, KeySet, StateDict};
use test_case::test_case;

/// Leaf key sets for a small Flux-style tree: a transformer with repeated
/// double blocks plus one text encoder, expanded to `block_bound` and
/// `layer_bound` candidate elements.
fn leaves(block_bound: usize, layer_bound: usize) -> Vec<KeySet> {
    let mut key_sets = Vec::new();

    let transformer = KeySet::new("lora_transformer", "transformer").build();
    for block in map_prefix_range_bounded(
        "double_blocks",
        "transformer_blocks",
        &transformer,
        block_bound,
    ) {
        key_sets.push(KeySet::new("img_attn.qkv", "attn.to_qkv").parent(&block).build());
        key_sets.push(
            KeySet::new("img_mlp.0", "ff.net.0.proj")
                .parent(&block)
                .swap_chunks(true)
                .build(),
        );
        key_sets.push(KeySet::new("img_mlp.2", "ff.net.2").parent(&block).build());
    }

    let text_encoder = KeySet::new("lora_te1", "text_encoder").build();
    for layer in map_prefix_range_bounded("layers", "encoder.layers", &text_encoder, layer_bound) {
        key_sets.push(
            KeySet::new("self_attn.q_proj", "self_attn.q_proj")
                .parent(&layer)
                .build(),
        );
    }

    key_sets
}

/// The conversion list is expanded wider than the real model so that the
/// unused candidate nodes are exercised as no-ops.
fn flux_key_sets() -> Vec<KeySet> {
    leaves(8, 4)
}

/// Builds a state dict holding every leaf of a 2-block, 1-layer model in
/// the given convention, with distinct deterministic tensor contents.
fn synthetic_input(convention: Convention) -> StateDict<Tensor> {
    let device = Device::Cpu;
    let mut input = StateDict::new();
    let mut seed = 0f32;
    for key_set in leaves(2, 1) {
        for suffix in [".lora_down.weight", ".lora_up.weight"] {
            let key = format!("{}{}", key_set.prefix(convention), suffix);
            let tensor = Tensor::arange(seed, seed + 8.0, &device)
                .unwrap()
                .reshape((4, 2))
                .unwrap();
            input.insert(key, tensor);
            seed += 8.0;
        }
    }
    input
}

fn assert_same(expected: &StateDict<Tensor>, actual: &StateDict<Tensor>) {
    let mut expected_keys: Vec<_> = expected.keys().collect();
    let mut actual_keys: Vec<_> = actual.keys().collect();
    expected_keys.sort();
    actual_keys.sort();
    assert_eq!(expected_keys, actual_keys);

    for (key, tensor) in expected {
        assert_eq!(
            tensor.to_vec2::<f32>().unwrap(),
            actual[key].to_vec2::<f32>().unwrap(),
            "tensor mismatch at {key}"
        );
    }
}

#[test_case(Convention::Omi, Convention::Diffusers; "omi via diffusers")]
#[test_case(Convention::Omi, Convention::LegacyDiffusers; "omi via legacy diffusers")]
#[test_case(Convention::Diffusers, Convention::Omi; "diffusers via omi")]
#[test_case(Convention::Diffusers, Convention::LegacyDiffusers; "diffusers via legacy diffusers")]
#[test_case(Convention::LegacyDiffusers, Convention::Omi; "legacy diffusers via omi")]
#[test_case(Convention::LegacyDiffusers, Convention::Diffusers; "legacy diffusers via diffusers")]
fn round_trip_restores_the_input(home: Convention, away: Convention) {
    let key_sets = flux_key_sets();
    let input = synthetic_input(home);

    let there = convert(&input, &key_sets, away).unwrap();
    let back = convert(&there, &key_sets, home).unwrap();

    assert_same(&input, &back);
}

#[test_case(Convention::Omi; "to omi")]
#[test_case(Convention::Diffusers; "to diffusers")]
#[test_case(Convention::LegacyDiffusers; "to legacy diffusers")]
fn conversion_is_exhaustive_over_matched_keys(target: Convention) {
    let key_sets = flux_key_sets();
    let input = synthetic_input(Convention::Diffusers);

    let output = convert(&input, &key_sets, target).unwrap();

    assert_eq!(output.len(), input.len());
    for key in output.keys() {
        let spelled_right = match target {
            Convention::Omi => key.starts_with("lora_"),
            Convention::Diffusers => {
                key.starts_with("transformer.") || key.starts_with("text_encoder.")
            }
            Convention::LegacyDiffusers => {
                key.starts_with("transformer_") || key.starts_with("text_encoder_")
            }
        };
        assert!(spelled_right, "unexpected key spelling for {target}: {key}");
    }
}

#[test]
fn up_projection_halves_swap_when_entering_omi() {
    let node = KeySet::new("blk.5", "blocks.5").swap_chunks(true).build();
    let tensor = Tensor::arange(0f32, 32f32, &Device::Cpu)
        .unwrap()
        .reshape((8, 4))
        .unwrap();
    let mut input = StateDict::new();
    input.insert("blocks.5.lora_up.weight".to_string(), tensor);

    let omi = convert(&input, std::slice::from_ref(&node), Convention::Omi).unwrap();

    assert_eq!(omi.len(), 1);
    let expected: Vec<Vec<f32>> = [4, 5, 6, 7, 0, 1, 2, 3]
        .iter()
        .map(|&row| (0..4).map(|col| (row * 4 + col) as f32).collect())
        .collect();
    assert_eq!(
        omi["blk.5.lora_up.weight"].to_vec2::<f32>().unwrap(),
        expected
    );
}

#[test]
fn checkpoint_noise_is_dropped_from_every_target() {
    let key_sets = flux_key_sets();
    let mut input = synthetic_input(Convention::Omi);
    input.insert(
        "optimizer.param_groups.0.exp_avg".to_string(),
        Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap(),
    );

    for target in Convention::DETECTION_ORDER {
        let output = convert(&input, &key_sets, target).unwrap();
        assert_eq!(output.len(), input.len() - 1);
        assert!(!output.keys().any(|k| k.starts_with("optimizer.")));
    }
}

#[test]
fn odd_up_projection_rows_surface_an_uneven_split_error() {
    let node = KeySet::new("blk.0", "blocks.0").swap_chunks(true).build();
    let mut input = StateDict::new();
    input.insert(
        "blocks.0.lora_up.weight".to_string(),
        Tensor::zeros((7, 4), candle_core::DType::F32, &Device::Cpu).unwrap(),
    );

    let err = convert(&input, std::slice::from_ref(&node), Convention::Omi).unwrap_err();
    assert!(matches!(err, Error::UnevenSplit { rows: 7 }));
}
