#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use genopred::encode::{GenotypeNormalizer, NormalizerConfig, NormalizerParams};
use genopred::select::{RepetitionObserver, StabilityConfig, StabilitySelector};
use genopred::table::{read_feature_table, read_genotype_table, write_matrix};

const NORMALIZER_FILE: &str = "normalizer.toml";
const NORMALIZED_FILE: &str = "normalized.tsv";
const SELECTOR_FILE: &str = "selector.toml";
const SELECTED_FILE: &str = "selected.tsv";

#[derive(Parser)]
#[command(
    name = "genopred",
    version,
    about = "Genotype normalization and stability-based feature selection for genomic prediction",
    long_about = "Converts genotype tables in any supported encoding (signed or unsigned dosages, \
                  A/H/B calls, allele calls) to a signed {-1, 0, 1} matrix, and selects stable \
                  features by repeated L1-penalized regression on resampled data."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Tab-separated genotype table with one column per marker and an optional sample_id column
    #[arg(value_name = "GENOTYPE_PATH")]
    genotype_path: PathBuf,

    /// Apply a previously saved normalizer instead of fitting a new one
    #[arg(long)]
    model: Option<PathBuf>,

    /// Number of leading rows inspected when detecting the encoding
    #[arg(long, default_value = "5")]
    sample_rows: usize,

    /// Directory for normalizer.toml and normalized.tsv
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    /// Tab-separated genotype table to check
    #[arg(value_name = "GENOTYPE_PATH")]
    genotype_path: PathBuf,

    /// Saved normalizer whose encoding the table must match
    #[arg(long)]
    model: PathBuf,

    /// Number of leading rows inspected when detecting the encoding
    #[arg(long, default_value = "5")]
    sample_rows: usize,
}

#[derive(Args)]
struct SelectArgs {
    /// Tab-separated numeric feature table; fitting requires a phenotype column
    #[arg(value_name = "FEATURE_PATH")]
    feature_path: PathBuf,

    /// Apply a previously saved selector instead of fitting a new one
    #[arg(long)]
    model: Option<PathBuf>,

    /// L1 penalty strength of the sparse regression
    #[arg(long, default_value = "0.1")]
    alpha: f64,

    /// Fraction of repetitions a feature must exceed to be retained
    #[arg(long, default_value = "0.1")]
    threshold: f64,

    /// Fraction of samples held out in each repetition
    #[arg(long, default_value = "0.2")]
    test_fraction: f64,

    /// Number of resampled fits
    #[arg(long, default_value = "200")]
    repetitions: usize,

    /// Iteration cap of the coordinate-descent solver
    #[arg(long, default_value = "10000")]
    max_iterations: usize,

    /// Directory for selector.toml and selected.tsv
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the genotype encoding and convert the table to the signed {-1, 0, 1} scale
    #[command(about = "Normalize a genotype table (outputs: normalizer.toml, normalized.tsv)")]
    Normalize(NormalizeArgs),
    /// Check that a genotype table uses the same encoding as a saved normalizer
    #[command(about = "Validate the encoding of a genotype table against a saved normalizer")]
    Validate(ValidateArgs),
    /// Run stability selection on a numeric feature table
    #[command(about = "Select stable features (outputs: selector.toml, selected.tsv)")]
    Select(SelectArgs),
}

/// Reports repetition progress on stderr when it is a terminal.
struct RepetitionProgressBar {
    bar: ProgressBar,
}

impl RepetitionProgressBar {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, draw_target);
        bar.set_style(
            ProgressStyle::with_template(
                "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} repetitions ({eta}) {msg}",
            )?
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        Ok(Self { bar })
    }
}

impl RepetitionObserver for RepetitionProgressBar {
    fn on_start(&self, repetitions: usize) {
        self.bar.set_length(repetitions as u64);
        self.bar.set_position(0);
    }

    fn on_repetition_finished(&self, repetition: usize, selected: usize) {
        self.bar
            .set_message(format!("last: #{repetition} kept {selected}"));
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn run_normalize(args: NormalizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let table = read_genotype_table(&args.genotype_path)?;

    let params = match &args.model {
        Some(model_path) => {
            println!("Loading normalizer from: {}", model_path.display());
            NormalizerParams::load(model_path)?
        }
        None => {
            let mut normalizer = GenotypeNormalizer::new(NormalizerConfig {
                read_only: false,
                sample_rows: args.sample_rows,
            });
            normalizer.fit(&table.genotypes)?;
            let params = normalizer
                .params()
                .cloned()
                .ok_or("normalizer produced no parameters after fitting")?;
            let model_path = args.out_dir.join(NORMALIZER_FILE);
            params.save(&model_path)?;
            println!("Normalizer saved to: {}", model_path.display());
            params
        }
    };
    println!("Encoding: {}", params.encoding);

    let matrix = params.transform(&table.genotypes)?;
    let output_path = args.out_dir.join(NORMALIZED_FILE);
    write_matrix(
        &output_path,
        &table.sample_ids,
        &params.columns,
        matrix.view(),
        None,
    )?;
    println!("Normalized genotypes written to: {}", output_path.display());
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = NormalizerParams::load(&args.model)?;
    let table = read_genotype_table(&args.genotype_path)?;
    params.check_consistent(&table.genotypes, args.sample_rows)?;
    println!(
        "'{}' matches the stored encoding ({}).",
        args.genotype_path.display(),
        params.encoding
    );
    Ok(())
}

fn load_or_fit_selector(
    args: &SelectArgs,
    features: &genopred::table::FeatureFile,
) -> Result<StabilitySelector, Box<dyn std::error::Error>> {
    if let Some(model_path) = &args.model {
        println!("Loading selector from: {}", model_path.display());
        return Ok(StabilitySelector::load(model_path)?);
    }

    let phenotype = features
        .phenotype
        .as_ref()
        .ok_or("fitting a selector requires a 'phenotype' column")?;
    let mut selector = StabilitySelector::new(StabilityConfig {
        alpha: args.alpha,
        threshold: args.threshold,
        test_fraction: args.test_fraction,
        repetitions: args.repetitions,
        max_iterations: args.max_iterations,
    })?;

    let progress = RepetitionProgressBar::new()?;
    selector.fit_with_observer(features.features.view(), phenotype.view(), &progress)?;

    let model_path = args.out_dir.join(SELECTOR_FILE);
    selector.save(&model_path)?;
    println!("Selector saved to: {}", model_path.display());
    Ok(selector)
}

fn run_select(args: SelectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let features = read_feature_table(&args.feature_path, args.model.is_none())?;
    let selector = load_or_fit_selector(&args, &features)?;

    let retained = selector.retained_features()?;
    if retained.fell_back {
        println!(
            "No feature cleared {:.1} selections; keeping every feature selected at least once.",
            retained.threshold
        );
    }
    let reduced = selector.transform(features.features.view())?;
    let names: Vec<String> = retained
        .indices()
        .into_iter()
        .map(|index| features.feature_names[index].clone())
        .collect();
    println!(
        "Retained {} of {} features: {}",
        names.len(),
        features.feature_names.len(),
        names.join(", ")
    );

    let output_path = args.out_dir.join(SELECTED_FILE);
    write_matrix(
        &output_path,
        &features.sample_ids,
        &names,
        reduced.view(),
        features.phenotype.as_ref().map(|values| values.view()),
    )?;
    println!("Selected features written to: {}", output_path.display());
    Ok(())
}

fn ensure_out_dir(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Normalize(args)) => {
            ensure_out_dir(&args.out_dir).and_then(|()| run_normalize(args))
        }
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::Select(args)) => {
            ensure_out_dir(&args.out_dir).and_then(|()| run_select(args))
        }
        None => Cli::command().print_help().map_err(|e| e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
