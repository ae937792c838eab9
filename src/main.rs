// src/main.rs
//
// Thin harness around the dynagym library.
// All of the real logic lives in the lib crate (loader, env, ppo, trainer).

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use burn::backend::{Autodiff, NdArray};
use clap::Parser;

use dynagym::{
    load_engine, load_mdp_config, load_train_config, DataRoot, Mdp, MetricsSink, MetricsWriter,
    NoopMetrics, TrainConfig, Trainer,
};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Command-line arguments for the dynagym binary.
#[derive(Parser, Debug)]
#[command(name = "dynagym")]
struct Cli {
    /// Path to the engine library (cdylib exporting `dynagym_engine_entry`).
    #[arg(long)]
    engine: PathBuf,

    /// Path to the MDP construction parameters (JSON).
    #[arg(long)]
    mdp_config: PathBuf,

    /// Optional training hyperparameters (JSON); defaults used when absent,
    /// and a partial document overrides only what it names.
    #[arg(long)]
    train_config: Option<PathBuf>,

    /// Data root for artifacts and metric streams.
    /// Falls back to $DYNAGYM_DATA_ROOT, then ./dynagym_data.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Override the number of training epochs.
    #[arg(long)]
    epochs: Option<u64>,

    /// Override the number of parallel training environments.
    #[arg(long)]
    train_envs: Option<usize>,

    /// Run seed; all randomness in the run derives from it.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Run name used for the metric stream; defaults to a timestamped name.
    #[arg(long)]
    run_name: Option<String>,

    /// Disable the on-disk metric stream.
    #[arg(long)]
    no_metrics: bool,

    /// Suppress the stdout run header and summary.
    #[arg(long, short = 'q')]
    quiet: bool,
}

fn fail(message: &str) -> ! {
    eprintln!("dynagym: {message}");
    process::exit(1);
}

/// Apply CLI overrides on top of the loaded (or default) training config.
fn build_train_config(cli: &Cli) -> TrainConfig {
    let mut cfg = match &cli.train_config {
        Some(path) => match load_train_config(path) {
            Ok(cfg) => cfg,
            Err(err) => fail(&err.to_string()),
        },
        None => TrainConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        cfg.max_epoch = epochs;
    }
    if let Some(n) = cli.train_envs {
        cfg.nr_train_envs = n;
    }
    cfg
}

fn default_run_name(seed: u64) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("run_{secs}_s{seed}")
}

fn build_sink(
    cli: &Cli,
    data_root: &DataRoot,
    mdp: &dyn Mdp,
    run_name: &str,
) -> Box<dyn MetricsSink> {
    if cli.no_metrics {
        return Box::new(NoopMetrics);
    }
    let path = data_root.train_log_path(&mdp.identifier(), run_name);
    match MetricsWriter::create(&path) {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            eprintln!(
                "dynagym: failed to create metric stream ({}), continuing without: {err}",
                path.display()
            );
            Box::new(NoopMetrics)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // 1) Configuration: MDP parameters + training hyperparameters.
    let mdp_config = match load_mdp_config(&cli.mdp_config) {
        Ok(cfg) => cfg,
        Err(err) => fail(&err.to_string()),
    };
    let train_config = build_train_config(&cli);
    let data_root = DataRoot::resolve(cli.data_root.as_deref());

    // 2) Engine. A mismatch diagnostic lists candidate binaries so the
    //    operator can tell "nothing built" apart from "built wrong".
    let engine = match load_engine(&cli.engine) {
        Ok(engine) => engine,
        Err(err) => fail(&err.to_string()),
    };

    let mdp: Arc<dyn Mdp> = match engine.provider().get_mdp(&mdp_config) {
        Ok(mdp) => mdp,
        Err(err) => fail(&err.to_string()),
    };
    if !cli.quiet {
        println!(
            "dynagym: mdp={} features={} actions={} epochs={} envs={} seed={} config={:016x}",
            mdp.identifier(),
            mdp.num_flat_features(),
            mdp.num_valid_actions(),
            train_config.max_epoch,
            train_config.nr_train_envs,
            cli.seed,
            dynagym::trainer::config_hash(&train_config),
        );
    }

    // 3) Metric stream + trainer.
    let run_name = cli
        .run_name
        .clone()
        .unwrap_or_else(|| default_run_name(cli.seed));
    let sink = build_sink(&cli, &data_root, mdp.as_ref(), &run_name);

    let device = Default::default();
    let mut trainer = match Trainer::<TrainBackend>::new(
        &engine,
        mdp,
        train_config,
        &data_root,
        &run_name,
        cli.seed,
        sink,
        device,
    ) {
        Ok(trainer) => trainer,
        Err(err) => fail(&err.to_string()),
    };

    // 4) Train.
    match trainer.run() {
        Ok(summary) => {
            if cli.quiet {
                return;
            }
            match (&summary.best_eval_reward, &summary.artifact) {
                (Some(best), Some(artifact)) => println!(
                    "dynagym: done after {} epochs; best eval reward {best:.4}; policy at {}",
                    summary.epochs_run,
                    artifact.model_path.display()
                ),
                _ => println!(
                    "dynagym: done after {} epochs; no evaluation checkpoints recorded",
                    summary.epochs_run
                ),
            }
        }
        Err(err) => fail(&err.to_string()),
    }
}
