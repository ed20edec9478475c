// mnist_lenet.rs
// Trains or evaluates a LeNet-5 style network on MNIST.
// Expected files (either spelling):
//   <data_dir>/train-images.idx3-ubyte
//   <data_dir>/train-labels.idx1-ubyte
//   <data_dir>/t10k-images.idx3-ubyte
//   <data_dir>/t10k-labels.idx1-ubyte
//
// Train mode writes <save_dir>/<model>.pth after the last epoch.
// Test mode loads <save_dir>/<pretrained> and prints loss and error.
//
// Set RUST_LOG=debug to see layer wiring and per-batch losses.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rust_lenet::architecture::{build_model, build_network, load_architecture, MNIST_SHAPE};
use rust_lenet::config::{load_config, validate_config, ModelKind, RunMode, TrainingConfig};
use rust_lenet::dataset::{load_mnist, BatchIndices, Dataset, MnistSplit, Normalization};
use rust_lenet::layers::{ActivationKind, LossKind, PoolKind};
use rust_lenet::optimizers::Sgd;
use rust_lenet::report::{format_epoch, EpochStats, LogReporter, Reporter};
use rust_lenet::tensor::Shape;
use rust_lenet::utils::{InitScheme, SeededRng};
use rust_lenet::Network;
use std::error::Error;
use std::path::PathBuf;
use std::process;

/// Train a LeNet-5 style network on MNIST, or evaluate a saved checkpoint.
///
/// Options given on the command line override values from `--config`.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON run configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON architecture replacing the built-in model
    #[arg(long)]
    architecture: Option<PathBuf>,
    /// train or test
    #[arg(long)]
    mode: Option<RunMode>,
    /// lenet5 or linear
    #[arg(long)]
    model: Option<ModelKind>,
    /// Directory holding the MNIST IDX files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Directory checkpoints are written to and read from
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Checkpoint file inside save_dir to evaluate in test mode
    #[arg(long)]
    pretrained: Option<String>,
    /// max or avg
    #[arg(long)]
    pool: Option<PoolKind>,
    /// tanh, relu or sigmoid
    #[arg(long)]
    activ: Option<ActivationKind>,
    /// Weight initializer, e.g. lecun_uniform or xavier_normal
    #[arg(long)]
    init: Option<InitScheme>,
    /// cross_entropy or mse
    #[arg(long)]
    loss: Option<LossKind>,
    #[arg(long)]
    batch: Option<usize>,
    #[arg(long)]
    epoch: Option<usize>,
    #[arg(long)]
    lr: Option<f32>,
    /// L2 weight decay
    #[arg(long)]
    decay: Option<f32>,
    /// Insert batch normalization after every conv/dense layer
    #[arg(long)]
    use_batchnorm: bool,
    /// Keep the training set in file order
    #[arg(long)]
    no_shuffle_train: bool,
    /// Shuffle the test set before evaluating it
    #[arg(long)]
    shuffle_test: bool,
    /// affine, unit or z_score
    #[arg(long)]
    normalization: Option<Normalization>,
    #[arg(long)]
    seed: Option<u64>,
    /// Use only the first N training samples
    #[arg(long)]
    n_train: Option<usize>,
    /// Use only the first N test samples
    #[arg(long)]
    n_test: Option<usize>,
    /// Report progress through the logger instead of a progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn into_config(self) -> Result<(TrainingConfig, Option<PathBuf>, bool), Box<dyn Error>> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)?,
            None => TrainingConfig::default(),
        };
        if let Some(v) = self.mode {
            cfg.mode = v;
        }
        if let Some(v) = self.model {
            cfg.model = v;
        }
        if let Some(v) = self.data_dir {
            cfg.data_dir = v;
        }
        if let Some(v) = self.save_dir {
            cfg.save_dir = v;
        }
        if self.pretrained.is_some() {
            cfg.pretrained = self.pretrained;
        }
        if let Some(v) = self.pool {
            cfg.pool = v;
        }
        if let Some(v) = self.activ {
            cfg.activ = v;
        }
        if let Some(v) = self.init {
            cfg.init = v;
        }
        if let Some(v) = self.loss {
            cfg.loss = v;
        }
        if let Some(v) = self.batch {
            cfg.batch = v;
        }
        if let Some(v) = self.epoch {
            cfg.epoch = v;
        }
        if let Some(v) = self.lr {
            cfg.lr = v;
        }
        if let Some(v) = self.decay {
            cfg.decay = v;
        }
        if let Some(v) = self.normalization {
            cfg.normalization = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        cfg.use_batchnorm |= self.use_batchnorm;
        cfg.shuffle_train &= !self.no_shuffle_train;
        cfg.shuffle_test |= self.shuffle_test;
        cfg.n_train = self.n_train.or(cfg.n_train);
        cfg.n_test = self.n_test.or(cfg.n_test);
        validate_config(&cfg)?;
        Ok((cfg, self.architecture, self.no_progress))
    }
}

/// One progress bar per epoch over its batches.
struct BarReporter {
    bar: Option<ProgressBar>,
    style: ProgressStyle,
}

impl BarReporter {
    fn new() -> Result<Self, Box<dyn Error>> {
        let style = ProgressStyle::default_bar()
            .template("epoch {prefix} [{bar:40}] {pos:>5}/{len:5} {msg} [eta: {eta}]")?
            .progress_chars("=> ");
        Ok(Self { bar: None, style })
    }
}

impl Reporter for BarReporter {
    fn on_epoch_start(&mut self, epoch: usize, total_batches: usize) {
        let bar = ProgressBar::new(total_batches as u64).with_style(self.style.clone());
        bar.set_prefix(epoch.to_string());
        self.bar = Some(bar);
    }

    fn on_batch(&mut self, _epoch: usize, _batch: usize, _total_batches: usize, loss: f32) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("loss {:.4}", loss));
            bar.inc(1);
        }
    }

    fn on_epoch(&mut self, stats: &EpochStats) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        println!("{}", format_epoch(stats));
    }
}

fn shuffled(data: &Dataset, rng: &mut SeededRng) -> Result<Dataset, Box<dyn Error>> {
    let batches = BatchIndices::generate(data.len(), data.len(), true, rng);
    let Some(order) = batches.iter().next() else {
        return Ok(data.clone());
    };
    let (x, labels) = data.batch(order)?;
    Ok(Dataset::new(x.into_vec(), labels, data.shape())?)
}

fn build(cfg: &TrainingConfig, architecture: Option<&PathBuf>) -> Result<(Network, Shape), Box<dyn Error>> {
    match architecture {
        Some(path) => {
            let arch = load_architecture(path)?;
            let input = arch.input()?;
            Ok((build_network(&arch, cfg.init, cfg.seed)?, input))
        }
        None => Ok((build_model(cfg), MNIST_SHAPE)),
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let (cfg, architecture, no_progress) = args.into_config()?;
    info!("configuration: {:?}", cfg);

    let (mut network, input_shape) = build(&cfg, architecture.as_ref())?;
    network.compile(
        input_shape,
        cfg.batch,
        Sgd::new(cfg.lr, cfg.decay)?,
        cfg.loss,
    )?;
    println!(
        "{} layers, {} trainable parameters",
        network.len(),
        network.parameter_count()
    );

    let mut test = load_mnist(&cfg.data_dir, MnistSplit::Test, cfg.normalization, cfg.n_test)?;
    if cfg.shuffle_test {
        test = shuffled(&test, &mut SeededRng::new(cfg.seed))?;
    }

    match cfg.mode {
        RunMode::Train => {
            let train = load_mnist(
                &cfg.data_dir,
                MnistSplit::Train,
                cfg.normalization,
                cfg.n_train,
            )?;
            println!(
                "training on {} samples, testing on {} samples",
                train.len(),
                test.len()
            );
            let mut reporter: Box<dyn Reporter> = if no_progress {
                Box::new(LogReporter::default())
            } else {
                Box::new(BarReporter::new()?)
            };
            network.fit(
                &train,
                cfg.epoch,
                cfg.shuffle_train,
                Some(&test),
                reporter.as_mut(),
            )?;
            let path = cfg.checkpoint_path();
            network.save(&path)?;
            println!("saved {}", path.display());
        }
        RunMode::Test => {
            let path = cfg
                .pretrained_path()
                .ok_or("test mode needs --pretrained")?;
            network.load(&path)?;
            let eval = network.evaluate(&test)?;
            println!(
                "testing loss -> {:.6}, testing error -> {:.2}%",
                eval.loss,
                eval.error_rate * 100.0
            );
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
