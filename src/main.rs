//! cachegrab: inspect, filter and export trace datasets.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use cachegrab::data::export::export_trace_csv;
use cachegrab::filters::{create_filter, filter_kinds};
use cachegrab::{Dataset, DatasetSink, DatasetSource, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "cachegrab")]
#[command(about = "Inspect, filter and export cache-probe trace datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the samples of a dataset: trace shapes and extras
    Info {
        /// Dataset directory
        dataset: PathBuf,
    },

    /// Run a dataset through a filter chain and save the result
    Filter {
        /// Dataset to read
        input: PathBuf,

        /// Where to save the filtered dataset (a dataset already there is replaced)
        output: PathBuf,

        /// Pipeline configuration (JSON with a list of filter descriptions)
        #[arg(short, long)]
        config: PathBuf,

        /// Process at most this many samples (overrides the config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write one trace of one sample as CSV
    Export {
        /// Dataset directory
        dataset: PathBuf,

        /// Sample index
        #[arg(short, long)]
        sample: usize,

        /// Trace name, e.g. L1D
        #[arg(short, long)]
        trace: String,

        /// CSV file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the available filter types with their default parameters
    Filters,
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    Dataset::load(path).with_context(|| format!("loading dataset {}", path.display()))
}

fn run_info(path: &Path) -> Result<()> {
    let dataset = load_dataset(path)?;
    println!("{}: {} samples", path.display(), dataset.len());
    for (i, sample) in dataset.iter().enumerate() {
        println!("  [{i:06}]");
        for (name, trace) in sample.traces() {
            let (rows, cols) = trace.shape();
            println!("    {name:<8} {rows} x {cols} {}", trace.dtype());
        }
        for (tag, value) in sample.extras() {
            println!("    {tag} = {value}");
        }
    }
    Ok(())
}

fn run_filter(input: &Path, output: &Path, config_path: &Path, limit: Option<usize>) -> Result<()> {
    let config = PipelineConfig::from_path(config_path)
        .with_context(|| format!("reading pipeline config {}", config_path.display()))?;
    let source = load_dataset(input)?.shared();
    let sink = Dataset::new().shared();

    let mut pipeline = Pipeline::new();
    config
        .apply_to(&mut pipeline)
        .context("building filters from config")?;
    pipeline.set_source(Box::new(DatasetSource::new(source)));
    pipeline.set_sink(Box::new(DatasetSink::new(sink.clone())));

    let count = pipeline
        .run(limit.or(config.limit))
        .context("running pipeline")?;

    sink.borrow()
        .save(output)
        .with_context(|| format!("saving dataset {}", output.display()))?;
    info!("wrote {count} samples to {}", output.display());
    println!("{count} samples -> {}", output.display());
    Ok(())
}

fn run_export(path: &Path, index: usize, trace_name: &str, output: &Path) -> Result<()> {
    let dataset = load_dataset(path)?;
    let Some(sample) = dataset.get(index) else {
        bail!("sample {index} out of range ({} samples)", dataset.len());
    };
    let Some(trace) = sample.trace(trace_name) else {
        let names: Vec<_> = sample.trace_names().collect();
        bail!(
            "sample {index} has no trace '{trace_name}' (has: {})",
            names.join(", ")
        );
    };
    export_trace_csv(trace, output)?;
    println!(
        "{trace_name} of sample {index} ({} x {}) -> {}",
        trace.rows(),
        trace.cols(),
        output.display()
    );
    Ok(())
}

fn run_filters() -> Result<()> {
    for (tag, name) in filter_kinds() {
        let Some(filter) = create_filter(tag) else {
            continue;
        };
        println!("{name} ({tag})");
        println!("  {}", filter.save()?);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { dataset } => run_info(&dataset),
        Commands::Filter {
            input,
            output,
            config,
            limit,
        } => run_filter(&input, &output, &config, limit),
        Commands::Export {
            dataset,
            sample,
            trace,
            output,
        } => run_export(&dataset, sample, &trace, &output),
        Commands::Filters => run_filters(),
    }
}
