//! Converts a synthetic Flux-style LoRA between all three conventions.
//!
//! Builds the key-set list the way model-specific code would, fills a state
//! dict with random adapter weights under the omi convention, then walks the
//! dict through diffusers and legacy diffusers spellings and back.

use anyhow::Result;
use candle_core::{Device, Tensor};
use loramap::{convert, map_prefix_range, Convention, KeySet, StateDict};

fn flux_key_sets() -> Vec<KeySet> {
    let mut key_sets = Vec::new();

    let transformer = KeySet::new("lora_transformer", "transformer").build();
    for block in map_prefix_range("double_blocks", "transformer_blocks", &transformer) {
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
    for layer in map_prefix_range("layers", "encoder.layers", &text_encoder) {
        key_sets.push(
            KeySet::new("self_attn.q_proj", "self_attn.q_proj")
                .parent(&layer)
                .build(),
        );
    }

    key_sets
}

/// Two double blocks and one text encoder layer worth of adapter weights,
/// spelled in the omi convention, plus one key no conversion should keep.
fn synthetic_checkpoint(device: &Device) -> Result<StateDict<Tensor>> {
    let mut state_dict = StateDict::new();

    for i in 0..2 {
        for module in ["img_attn.qkv", "img_mlp.0", "img_mlp.2"] {
            let prefix = format!("lora_transformer.double_blocks.{i}.{module}");
            state_dict.insert(
                format!("{prefix}.lora_down.weight"),
                Tensor::randn(0f32, 1f32, (16, 64), device)?,
            );
            state_dict.insert(
                format!("{prefix}.lora_up.weight"),
                Tensor::randn(0f32, 1f32, (64, 16), device)?,
            );
        }
    }
    state_dict.insert(
        "lora_te1.layers.0.self_attn.q_proj.lora_down.weight".to_string(),
        Tensor::randn(0f32, 1f32, (16, 32), device)?,
    );
    state_dict.insert(
        "lora_te1.layers.0.self_attn.q_proj.lora_up.weight".to_string(),
        Tensor::randn(0f32, 1f32, (32, 16), device)?,
    );

    // Optimizer state rides along in real checkpoints and is dropped.
    state_dict.insert(
        "optimizer.param_groups.0.exp_avg".to_string(),
        Tensor::zeros((4, 4), candle_core::DType::F32, device)?,
    );

    Ok(state_dict)
}

fn print_keys(label: &str, state_dict: &StateDict<Tensor>) {
    let mut keys: Vec<_> = state_dict.keys().collect();
    keys.sort();
    println!("{label} ({} keys):", keys.len());
    for key in keys {
        println!("  {key}");
    }
    println!();
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let key_sets = flux_key_sets();
    let input = synthetic_checkpoint(&Device::Cpu)?;
    print_keys("omi checkpoint", &input);

    let diffusers = convert(&input, &key_sets, Convention::Diffusers)?;
    print_keys("diffusers", &diffusers);

    let legacy = convert(&diffusers, &key_sets, Convention::LegacyDiffusers)?;
    print_keys("legacy diffusers", &legacy);

    let back = convert(&legacy, &key_sets, Convention::Omi)?;
    print_keys("back to omi", &back);

    Ok(())
}
