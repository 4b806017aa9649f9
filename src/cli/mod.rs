//! TabTransformer CLI Module
//!
//! Command-line interface for training, inspecting data and printing default
//! hyperparameters.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{HyperParameters, ProblemType};
use crate::dataset::infer_problem_type;
use crate::training::{FitReport, TabTrainer};
use crate::utils::{
    encode_class_labels, load_column_types, load_csv, split_target, suggest_column_types,
    train_val_split, DatasetInfo,
};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tabtransformer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tabular feature encoding and embedding-model training")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model on a CSV file
    Train {
        /// Input data file (CSV or TSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Target column name
        #[arg(short, long)]
        target: String,

        /// Problem type (regression, binary, multiclass); inferred when omitted
        #[arg(long)]
        problem_type: Option<String>,

        /// Hyperparameter JSON file
        #[arg(long)]
        params: Option<PathBuf>,

        /// Column type JSON file: [{"name": ..., "type": ...}]
        #[arg(long, conflicts_with = "infer_types")]
        column_types: Option<PathBuf>,

        /// Guess column types from the data instead of treating all as categorical
        #[arg(long)]
        infer_types: bool,

        /// Finetuning epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Pretraining epochs
        #[arg(long)]
        pretrain_epochs: Option<usize>,

        /// Fraction of rows held out for validation
        #[arg(long, default_value = "0.2")]
        val_fraction: f64,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the fit report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Print default hyperparameters as JSON
    Params {
        /// Problem type (regression, binary, multiclass)
        #[arg(long)]
        problem_type: String,

        /// Number of classes, required for multiclass
        #[arg(long)]
        nunique: Option<usize>,
    },

    /// Show data information
    Info {
        /// Input data file
        #[arg(short, long)]
        data: PathBuf,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub struct TrainArgs<'a> {
    pub data: &'a Path,
    pub target: &'a str,
    pub problem_type: Option<&'a str>,
    pub params: Option<&'a Path>,
    pub column_types: Option<&'a Path>,
    pub infer_types: bool,
    pub epochs: Option<usize>,
    pub pretrain_epochs: Option<usize>,
    pub val_fraction: f64,
    pub seed: Option<u64>,
    pub report: Option<&'a Path>,
}

pub fn cmd_train(args: TrainArgs<'_>) -> anyhow::Result<()> {
    section("Train");

    step_run("Loading data");
    let start = Instant::now();
    let df = load_csv(args.data)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));

    let (features, raw_labels) = split_target(&df, args.target)?;
    let problem_type = match args.problem_type {
        Some(p) => p.parse::<ProblemType>()?,
        None => infer_problem_type(&raw_labels)?,
    };

    let (labels, classes) = if problem_type.is_classification() {
        let (ids, classes) = encode_class_labels(&raw_labels)?;
        (ids, Some(classes))
    } else {
        (raw_labels, None)
    };
    let nunique = classes.as_ref().map(|c| c.len());

    let mut params = match args.params {
        Some(path) => {
            let mut params = HyperParameters::from_file(path)?;
            let defaults = HyperParameters::default_for(problem_type, nunique)?;
            params.problem_type = defaults.problem_type;
            params.n_classes = defaults.n_classes;
            params
        }
        None => HyperParameters::default_for(problem_type, nunique)?,
    };
    if let Some(epochs) = args.epochs {
        params = params.with_epochs(epochs);
    }
    if let Some(pretrain_epochs) = args.pretrain_epochs {
        params = params.with_pretrain_epochs(pretrain_epochs);
    }
    if let Some(seed) = args.seed {
        params = params.with_seed(seed);
    }
    params.validate()?;

    let columns = match (args.column_types, args.infer_types) {
        (Some(path), _) => Some(load_column_types(path)?),
        (None, true) => Some(suggest_column_types(&features)?),
        (None, false) => None,
    };

    let ((train_x, train_y), (val_x, val_y)) =
        train_val_split(&features, &labels, args.val_fraction, params.seed)?;
    let val = if val_x.height() > 0 { Some((val_x, &val_y)) } else { None };

    kv("Problem type", &format!("{:?}", problem_type).to_lowercase());
    if let Some(classes) = &classes {
        kv("Classes", &classes.join(", "));
    }
    kv("Train rows", &train_x.height().to_string());

    step_run("Training");
    let start = Instant::now();
    let mut trainer = TabTrainer::new(params)?;
    let report = trainer.fit(train_x, &train_y, val, columns)?;
    step_done(&format!("{:?}", start.elapsed()));

    print_report(&report);

    if let Some(path) = args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("  {} report written to {}", ok("✓"), path.display());
    }
    println!();
    Ok(())
}

fn print_report(report: &FitReport) {
    println!();
    kv("Parameters", &report.n_parameters.to_string());
    kv("Pretrain epochs", &report.pretrain_epochs().to_string());
    kv("Finetune epochs", &report.finetune_epochs().to_string());
    if let Some(epoch) = report.best_epoch {
        kv("Best epoch", &epoch.to_string());
    }
    if let Some(loss) = report.best_val_loss {
        kv("Best val loss", &format!("{:.4}", loss));
    }
    let best_acc = report
        .history
        .iter()
        .find(|r| Some(r.epoch) == report.best_epoch && !r.pretrain)
        .and_then(|r| r.val_accuracy);
    if let Some(acc) = best_acc {
        kv("Val accuracy", &format!("{:.2}%", acc));
    }
    if report.stopped_early {
        kv("Stopped early", "yes");
    }
    if !report.null_encoded_columns.is_empty() {
        kv("Not encoded", &report.null_encoded_columns.join(", ").yellow().to_string());
    }
}

pub fn cmd_params(problem_type: &str, nunique: Option<usize>) -> anyhow::Result<()> {
    let problem_type = problem_type.parse::<ProblemType>()?;
    let params = HyperParameters::default_for(problem_type, nunique)?;
    println!("{}", params.to_json()?);
    Ok(())
}

pub fn cmd_info(data_path: &Path) -> anyhow::Result<()> {
    section("Data Info");

    let df = load_csv(data_path)?;
    let info = DatasetInfo::from_frame(&df)?;
    kv("Rows", &info.n_rows.to_string());
    kv("Columns", &info.columns.len().to_string());

    println!();
    println!(
        "  {:<24} {:<10} {:>8} {:>8}  {}",
        muted("Column"),
        muted("Dtype"),
        muted("Nulls"),
        muted("Unique"),
        muted("Type")
    );
    println!("  {}", dim(&"─".repeat(64)));
    for col in &info.columns {
        println!(
            "  {:<24} {:<10} {:>8} {:>8}  {}",
            col.name,
            col.dtype,
            col.null_count,
            col.n_unique,
            accent(col.suggested_type.as_str())
        );
    }
    println!();
    Ok(())
}
