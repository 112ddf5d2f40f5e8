//! Command line entry point for the CNN-RNN array classifier
//!
//! - Parameter summary of a configured model
//! - Forward pass over a JSON batch or a synthetic batch
//! - Export of freshly initialised weights as a checkpoint

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::info;

use cta_cnn_rnn::{
    normalize_inputs,
    utils::{setup_logging, Config},
    CnnRnnModel, EventBatch, FeatureBatch, LabelBatch, ModelParams, ParamStore, TelescopeLayout,
};

#[derive(Parser)]
#[command(name = "cnn_rnn")]
#[command(version = "0.1.0")]
#[command(about = "CNN-RNN gamma/hadron classifier for telescope arrays", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print parameter counts per scope
    Summary {
        /// List every parameter tensor
        #[arg(short, long)]
        all: bool,
    },

    /// Run a forward pass and print logits
    Predict {
        /// JSON batch with telescope_data, telescope_triggers,
        /// telescope_aux_inputs and gamma_hadron_label
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Checkpoint holding every model parameter
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Events in the synthetic batch when no input is given
        #[arg(short, long, default_value = "4")]
        batch_size: usize,
    },

    /// Save freshly initialised parameters as a checkpoint
    InitWeights {
        /// Output checkpoint path
        #[arg(short, long, default_value = "cnn_rnn_weights.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config);

    let log_level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    setup_logging(log_level)?;
    info!("Using configuration from {}", cli.config);

    match cli.command {
        Commands::Summary { all } => summary(&config.model, all),
        Commands::Predict {
            input,
            weights,
            batch_size,
        } => predict(&config.model, input.as_deref(), weights.as_deref(), batch_size),
        Commands::InitWeights { output } => init_weights(&config.model, &output),
    }
}

fn summary(params: &ModelParams, all: bool) -> Result<()> {
    let mut store = ParamStore::new(params.seed);
    let model = CnnRnnModel::new(params, &mut store)?;
    let layout = model.layout();

    println!("CNN-RNN model");
    println!("  telescope type:   {}", layout.telescope_type);
    println!("  telescopes:       {}", layout.num_telescopes);
    println!("  image shape:      {:?}", layout.image_shape());
    println!("  aux inputs:       {}", layout.num_aux_inputs);
    println!("  cnn block:        {}", model.cnn_block());
    println!("  embedding size:   {}", params.embedding_size);
    println!("  lstm size:        {}", params.lstm_size);
    println!("  classes:          {}", params.num_classes);
    println!();
    println!("  cnn_block:        {:>12}", store.num_params_in_scope("cnn_block/"));
    println!(
        "  image_embedding:  {:>12}",
        store.num_params_in_scope("network_head/image_embedding/")
    );
    println!(
        "  attention_cell:   {:>12}",
        store.num_params_in_scope("network_head/attention_cell/")
    );
    println!(
        "  logits:           {:>12}",
        store.num_params_in_scope("network_head/logits/")
    );
    println!("  total:            {:>12}", store.num_params());
    println!("  trainable:        {:>12}", store.num_trainable_params());

    if all {
        println!();
        for name in store.names() {
            let shape = store.get(name)?.shape().to_vec();
            println!("  {:<64} {:?}", name, shape);
        }
    }
    Ok(())
}

fn predict(
    params: &ModelParams,
    input: Option<&Path>,
    weights: Option<&Path>,
    batch_size: usize,
) -> Result<()> {
    let mut store = ParamStore::new(params.seed);
    let model = CnnRnnModel::new(params, &mut store)?;

    if let Some(path) = weights {
        store
            .restore_from_checkpoint(path, &[("", "")])
            .with_context(|| format!("Failed to restore weights from {}", path.display()))?;
    }

    let batch = match input {
        Some(path) => EventBatch::from_json_file(path)
            .with_context(|| format!("Failed to read batch from {}", path.display()))?,
        None => {
            info!("No input given, generating {} synthetic events", batch_size);
            synthetic_batch(model.layout(), batch_size, params.seed.unwrap_or(0))
        }
    };

    let inputs = normalize_inputs(&batch.features, &batch.labels, model.layout())?;
    let output = model.forward(&store, &inputs, false)?;

    println!("{:<8} {:<8} {:<8} logits", "event", "label", "length");
    for (b, logits) in output.logits.outer_iter().enumerate() {
        println!(
            "{:<8} {:<8} {:<8} {:?}",
            b,
            inputs.gamma_hadron_labels[b],
            output.valid_lengths[b],
            logits.to_vec()
        );
    }
    Ok(())
}

fn init_weights(params: &ModelParams, output: &Path) -> Result<()> {
    let mut store = ParamStore::new(params.seed);
    CnnRnnModel::new(params, &mut store)?;
    store.save(output)?;
    println!("Saved {} parameters to {}", store.num_params(), output.display());
    Ok(())
}

/// Random images and triggers, with at least one triggered telescope per event
fn synthetic_batch(layout: &TelescopeLayout, batch_size: usize, seed: u64) -> EventBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let num_tel = layout.num_telescopes;

    let telescope_data: Vec<f32> = (0..batch_size * num_tel * layout.image_size())
        .map(|_| rng.gen::<f32>())
        .collect();
    let telescope_triggers: Vec<f32> = (0..batch_size * num_tel)
        .map(|i| if i % num_tel == 0 || rng.gen_bool(0.5) { 1.0 } else { 0.0 })
        .collect();
    let telescope_aux_inputs: Vec<f32> = (0..batch_size * num_tel * layout.num_aux_inputs)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    let gamma_hadron_label: Vec<i64> = (0..batch_size).map(|_| rng.gen_range(0..2)).collect();

    EventBatch {
        features: FeatureBatch {
            telescope_data,
            telescope_triggers,
            telescope_aux_inputs,
        },
        labels: LabelBatch { gamma_hadron_label },
    }
}
