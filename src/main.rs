use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::info;
use seqzarr::apply::{block_apply_into, par_apply, ApplyConfig, BlockSink, BlockValue, TextSink};
use seqzarr::core::file::SeqFile;
use seqzarr::core::utils::create_spinner;
use seqzarr::core::zarr;
use seqzarr::merge::{merge_files, MergeOptions};
use seqzarr::var::ReadOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Selection-scoped access to variant calls stored in Zarr
#[derive(Parser, Debug)]
#[command(author, version, about = "Variant call store toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarise a store
    Info(InfoArgs),
    /// Print one variable as text, block by block
    Get(GetArgs),
    /// Merge several stores over the union of their variants
    Merge(MergeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SharedOptions {
    /// Number of threads to use for parallel processing
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub threads: usize,

    /// Show progress bars
    #[arg(long = "progress")]
    pub progress: bool,
}

impl SharedOptions {
    /// Initialize thread pool
    pub fn initialize_threading(&self) -> Result<()> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build_global()?;
        Ok(())
    }
}

/// Selection flags shared by commands reading a store
#[derive(Args, Debug, Clone)]
pub struct SelectionOptions {
    /// Keep only variants on this chromosome
    #[arg(short = 'c', long = "chromosome")]
    pub chromosome: Option<String>,

    /// Comma separated sample ids to keep
    #[arg(short = 's', long = "samples", value_delimiter = ',', num_args = 1..)]
    pub samples: Option<Vec<String>>,
}

impl SelectionOptions {
    fn apply(&self, file: &mut SeqFile) -> Result<()> {
        if let Some(ref chrom) = self.chromosome {
            file.set_chromosome(chrom)?;
        }
        if let Some(ref samples) = self.samples {
            file.set_samples_by_id(samples)?;
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to the store
    pub store: PathBuf,

    /// Also list every node
    #[arg(long = "nodes")]
    pub nodes: bool,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Path to the store
    pub store: PathBuf,

    /// Variable to print, e.g. genotype, $dosage, annotation/info/DP
    pub variable: String,

    /// Variants per block
    #[arg(short = 'b', long = "block-size", default_value_t = 1024)]
    pub block_size: usize,

    /// Byte genotypes and dosages, 255 for missing
    #[arg(long = "raw")]
    pub raw: bool,

    /// One slot per variant for INFO fields with at most one value
    #[arg(long = "pad-na")]
    pub pad_na: bool,

    /// Output file (defaults to stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub selection: SelectionOptions,

    /// Shared options
    #[command(flatten)]
    pub shared: SharedOptions,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Stores to merge, in sample order
    #[arg(required = true, num_args = 2..)]
    pub input: Vec<PathBuf>,

    /// Output path for the merged store
    #[arg(short = 'o', long = "output", required = true)]
    pub output: PathBuf,

    /// Comma separated INFO fields to keep (default: all)
    #[arg(long = "info", value_delimiter = ',', num_args = 1..)]
    pub info: Option<Vec<String>>,

    #[command(flatten)]
    pub selection: SelectionOptions,

    /// Shared options
    #[command(flatten)]
    pub shared: SharedOptions,
}

impl InfoArgs {
    pub fn run(self) -> Result<()> {
        let metadata = zarr::read_metadata(&self.store)?;
        let file = SeqFile::open_path(&self.store)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "samples\t{}", file.num_samples())?;
        writeln!(out, "variants\t{}", file.num_variants())?;
        writeln!(out, "ploidy\t{}", file.ploidy())?;
        for run in file.chrom_index().runs() {
            writeln!(out, "chromosome\t{}\t{}", run.label, run.count)?;
        }
        if self.nodes {
            for node in &metadata.nodes {
                writeln!(out, "node\t{}\t{}\t{:?}", node.path, node.kind, node.shape)?;
            }
        }
        Ok(())
    }
}

impl GetArgs {
    pub fn run(self) -> Result<()> {
        self.shared.initialize_threading()?;
        let mut file = SeqFile::open_path(&self.store)?;
        self.selection.apply(&mut file)?;

        let config = ApplyConfig {
            block_size: self.block_size,
            read: ReadOptions {
                use_raw: self.raw,
                pad_na: self.pad_na,
            },
            progress: self.shared.progress,
            ..Default::default()
        };
        let writer: Box<dyn Write> = match self.output {
            Some(ref path) => Box::new(
                std::fs::File::create(path)
                    .wrap_err_with(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Box::new(std::io::stdout().lock()),
        };
        let mut sink = TextSink::new(BufWriter::new(writer));
        let names = [self.variable.as_str()];

        if self.shared.threads > 1 {
            let blocks = par_apply(&file, &names, &config, self.shared.threads, |bundle, _| {
                Ok(bundle[0].to_lines())
            })?;
            for (i, lines) in blocks.into_iter().enumerate() {
                sink.accept(i, BlockValue::Lines(lines))?;
            }
            sink.finish()?;
        } else {
            block_apply_into(
                &mut file,
                &names,
                &config,
                |bundle, _| Ok(BlockValue::Lines(bundle[0].to_lines())),
                &mut sink,
            )?;
        }
        Ok(())
    }
}

impl MergeArgs {
    pub fn run(self) -> Result<()> {
        self.shared.initialize_threading()?;
        if self.output.exists() {
            bail!("Output '{}' already exists", self.output.display());
        }
        let mut files = self
            .input
            .iter()
            .map(|path| {
                let mut file = SeqFile::open_path(path)?;
                self.selection.apply(&mut file)?;
                Ok(file)
            })
            .collect::<Result<Vec<_>>>()?;

        let options = MergeOptions {
            info_fields: self.info.clone().unwrap_or_default(),
            progress: self.shared.progress,
        };
        let merged = merge_files(&mut files, &options)?;

        let pb = create_spinner(&format!("Writing {}", self.output.display()));
        let metadata = zarr::save(&merged, &self.output)?;
        pb.finish_and_clear();
        info!(
            "Wrote {} variants for {} samples to {}",
            metadata.num_variants,
            metadata.num_samples,
            self.output.display()
        );
        Ok(())
    }
}

// Main entry point
pub fn main() -> Result<()> {
    color_eyre::install()?;
    use env_logger::Env;

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info(args) => args.run(),
        Commands::Get(args) => args.run(),
        Commands::Merge(args) => args.run(),
    }
}
