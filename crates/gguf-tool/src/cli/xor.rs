use std::path::{Path, PathBuf};

use anyhow::Context;
use gguf_format::{GGUF_DEFAULT_ALIGNMENT, GGUFWriter, KEY_ALIGNMENT, TensorType, WriteSummary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::cli::XorArgs;
use crate::config::ToolConfig;
use crate::display::shape_string;

pub const MODEL_NAME: &str = "xor-model";
pub const MODEL_FILE: &str = "xor-model.gguf";

/// One parameter tensor of the XOR network.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub shape: Vec<u64>,
    pub data: Vec<f32>,
}

impl Parameter {
    fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

pub fn execute(args: XorArgs) -> anyhow::Result<()> {
    let cfg = ToolConfig::load_or_default()?;
    let dir = args.model_path.unwrap_or_else(|| cfg.models_dir.clone());

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(rand::thread_rng())?,
    };
    let params = xor_parameters(&mut rng)?;

    let path = export(&dir, &params, cfg.alignment)?;
    println!();
    println!("Model tensors saved to {}:", path.display());
    for p in &params {
        println!("{}\t({})", p.name, shape_string(&p.shape));
    }
    Ok(())
}

/// Two inputs, two hidden units, one output. Weights are He-initialized,
/// biases start at zero.
pub fn xor_parameters(rng: &mut impl Rng) -> anyhow::Result<Vec<Parameter>> {
    Ok(vec![
        Parameter {
            name: "fc1.weight",
            shape: vec![2, 2],
            data: he_normal(rng, 2, 4)?,
        },
        Parameter {
            name: "fc1.bias",
            shape: vec![2],
            data: vec![0.0; 2],
        },
        Parameter {
            name: "fc2.weight",
            shape: vec![2],
            data: he_normal(rng, 2, 2)?,
        },
        Parameter {
            name: "fc2.bias",
            shape: vec![1],
            data: vec![0.0; 1],
        },
    ])
}

/// Samples from N(0, sqrt(2 / fan_in)).
fn he_normal(rng: &mut impl Rng, fan_in: u32, count: usize) -> anyhow::Result<Vec<f32>> {
    let std_dev = (2.0 / f64::from(fan_in)).sqrt();
    let normal = Normal::new(0.0, std_dev)?;
    Ok((0..count).map(|_| normal.sample(rng) as f32).collect())
}

/// Write `params` to `dir/xor-model.gguf`, creating `dir` if needed.
pub fn export(dir: &Path, params: &[Parameter], alignment: u32) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(MODEL_FILE);

    let mut writer = GGUFWriter::create(&path, MODEL_NAME)?;
    if alignment != GGUF_DEFAULT_ALIGNMENT {
        writer.set_metadata(KEY_ALIGNMENT, alignment)?;
    }
    for p in params {
        writer.add_tensor(p.name, &p.shape, TensorType::F32, p.to_le_bytes())?;
    }
    let WriteSummary {
        tensor_count,
        total_bytes,
        ..
    } = writer.finalize()?;
    tracing::info!(path = %path.display(), tensor_count, total_bytes, "wrote model");
    Ok(path)
}
