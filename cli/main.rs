#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::process;

use zvlogit::io::{read_labels, read_matrix, write_matrix};
use zvlogit::sampler::LogisticPosterior;
use zvlogit::{
    ChainStore, HeldOutSet, PredictionRule, PredictiveEvaluator, SingularPolicy, ZvConfig,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum PredictionRuleCli {
    Threshold,
    Sigmoid,
}

impl From<PredictionRuleCli> for PredictionRule {
    fn from(rule: PredictionRuleCli) -> Self {
        match rule {
            PredictionRuleCli::Threshold => PredictionRule::Threshold,
            PredictionRuleCli::Sigmoid => PredictionRule::Sigmoid,
        }
    }
}

/// Options shared by every subcommand that scores draws.
#[derive(Args)]
pub struct EvaluationArgs {
    /// Held-out covariates, one row per observation
    #[arg(long, value_name = "PATH")]
    pub test_x: PathBuf,

    /// Held-out labels (single 0/1 column)
    #[arg(long, value_name = "PATH")]
    pub test_y: PathBuf,

    /// Number of leading draws to use (defaults to all draws, or the sampler setting for `fit`)
    #[arg(long, value_name = "N")]
    pub n_iters: Option<usize>,

    /// TOML configuration file; flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// How a draw turns into a held-out prediction
    #[arg(long, value_enum)]
    pub prediction_rule: Option<PredictionRuleCli>,

    /// Fall back to the pseudo-inverse when the gradient covariance is singular
    #[arg(long)]
    pub pseudo_inverse: bool,
}

#[derive(Args)]
pub struct PostprocessArgs {
    /// Posterior draws, one row per iteration
    #[arg(long, value_name = "PATH")]
    pub draws: PathBuf,

    /// Log-posterior gradients at each draw, same shape as the draws
    #[arg(long, value_name = "PATH", required_unless_present = "train_x", conflicts_with_all = ["train_x", "train_y"])]
    pub gradients: Option<PathBuf>,

    /// Training covariates used to recompute gradients when none are supplied
    #[arg(long, value_name = "PATH", requires = "train_y")]
    pub train_x: Option<PathBuf>,

    /// Training labels used to recompute gradients when none are supplied
    #[arg(long, value_name = "PATH", requires = "train_x")]
    pub train_y: Option<PathBuf>,

    #[command(flatten)]
    pub evaluation: EvaluationArgs,

    /// Where to write the adjusted draws
    #[arg(long, value_name = "PATH", default_value = "adjusted.csv")]
    pub output: PathBuf,

    /// Optional TOML report of the log-losses and per-dimension variances
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct FitArgs {
    /// Training covariates, one row per observation
    #[arg(long, value_name = "PATH")]
    pub train_x: PathBuf,

    /// Training labels (single 0/1 column)
    #[arg(long, value_name = "PATH")]
    pub train_y: PathBuf,

    #[command(flatten)]
    pub evaluation: EvaluationArgs,

    /// Sampler seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for draws.csv, gradients.csv, adjusted.csv and report.toml
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "zvlogit",
    about = "Zero-variance control variates for Bayesian logistic regression",
    long_about = "Reduces the variance of HMC draws from a logistic-regression posterior with \
                 gradient-based control variates and compares held-out log-loss before and after."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Adjust an existing chain and score it on held-out data
    #[command(about = "Adjust existing draws (outputs: adjusted.csv, optional report.toml)")]
    Postprocess(PostprocessArgs),

    /// Sample the posterior with HMC, then adjust and score the draws
    #[command(about = "Run HMC, then postprocess (outputs: draws, gradients, adjusted, report)")]
    Fit(FitArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Postprocess(args)) => run_postprocess(args),
        Some(Commands::Fit(args)) => run_fit(args),
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Loads the config file, if any, and applies command-line overrides on top.
fn resolve_config(args: &EvaluationArgs) -> Result<ZvConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ZvConfig::load(path)?,
        None => ZvConfig::default(),
    };
    if let Some(rule) = args.prediction_rule {
        config.evaluator.prediction_rule = rule.into();
    }
    if args.pseudo_inverse {
        config.reducer.singular_policy = SingularPolicy::PseudoInverse;
    }
    Ok(config)
}

fn load_evaluator(
    args: &EvaluationArgs,
    config: &ZvConfig,
) -> Result<PredictiveEvaluator, Box<dyn std::error::Error>> {
    let held_out = HeldOutSet::new(read_matrix(&args.test_x)?, read_labels(&args.test_y)?)?;
    log::info!(
        "Loaded {} held-out observations with {} covariates",
        held_out.n_observations(),
        held_out.dim()
    );
    Ok(PredictiveEvaluator::new(held_out, config.evaluator.clone())?)
}

fn run_postprocess(args: PostprocessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args.evaluation)?;
    let draws = read_matrix(&args.draws)?;
    let n_iters = args.evaluation.n_iters.unwrap_or(draws.nrows());

    let store = match (&args.gradients, &args.train_x, &args.train_y) {
        (Some(path), _, _) => ChainStore::new(draws, read_matrix(path)?, n_iters)?,
        (None, Some(x_path), Some(y_path)) => {
            let x_train = read_matrix(x_path)?;
            let y_train = read_labels(y_path)?;
            let target = LogisticPosterior::new(
                x_train.view(),
                y_train.view(),
                config.sampler.prior_scale,
            )?;
            log::info!(
                "Computing gradients at {} draws from {} training observations",
                n_iters,
                target.n_observations()
            );
            ChainStore::materialize(draws, &target, n_iters)?
        }
        _ => {
            return Err("either --gradients or both --train-x and --train-y are required".into());
        }
    };

    let evaluator = load_evaluator(&args.evaluation, &config)?;
    let outcome = zvlogit::postprocess(&store, &evaluator, &config.reducer)?;

    write_matrix(&args.output, outcome.reduction.adjusted.view(), "beta")?;
    println!("{}", outcome.report);
    println!("Adjusted draws written to {}", args.output.display());

    if let Some(report_path) = &args.report {
        outcome.report.save(report_path)?;
        println!("Report written to {}", report_path.display());
    }
    Ok(())
}

fn run_fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = resolve_config(&args.evaluation)?;
    if let Some(n_iters) = args.evaluation.n_iters {
        config.sampler.n_iters = n_iters;
    }
    if let Some(seed) = args.seed {
        config.sampler.seed = seed;
    }

    let x_train = read_matrix(&args.train_x)?;
    let y_train = read_labels(&args.train_y)?;
    // Fail on unreadable held-out data before spending time sampling.
    let evaluator = load_evaluator(&args.evaluation, &config)?;

    let store = zvlogit::fit(x_train.view(), y_train.view(), &config.sampler)?;
    let outcome = zvlogit::postprocess(&store, &evaluator, &config.reducer)?;

    fs::create_dir_all(&args.out_dir)?;
    let out = |name: &str| args.out_dir.join(name);
    write_matrix(out("draws.csv"), store.sample(), "beta")?;
    write_matrix(out("gradients.csv"), store.gradient(), "grad")?;
    write_matrix(out("adjusted.csv"), outcome.reduction.adjusted.view(), "beta")?;
    outcome.report.save(out("report.toml"))?;

    println!("{}", outcome.report);
    println!("Outputs written to {}", args.out_dir.display());
    Ok(())
}
