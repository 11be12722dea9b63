// ========================================================================================
//
//                                 GRAFPOP COMMAND LINE
//
// ========================================================================================
//
// Parses arguments, merges them over the optional TOML configuration, runs the
// inference once and reports the outcome. Failures are reported with their category
// and mapped to a distinct exit status. The first Ctrl-C stops the run between
// samples; a second one exits at once.

use clap::Parser;
use grafpop::config::RunConfig;
use grafpop::pipeline::{self, PipelineError, RunSummary};
use grafpop::scorer::CancellationToken;
use grafpop::types::ErrorCategory;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "grafpop",
    version,
    about = "Infers genetic ancestry of PLINK or VCF samples against a fixed panel of ancestry SNPs."
)]
struct Args {
    /// PLINK prefix, .bed/.bim/.fam file, or .vcf / .vcf.gz file.
    genotype_path: PathBuf,

    /// Where the ancestry results are written.
    output: PathBuf,

    /// The AncInferSNPs.txt panel, or the directory holding it.
    #[clap(long)]
    panel: Option<PathBuf>,

    /// TOML file with run settings; flags given here take precedence.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Minimum genotyped ancestry SNPs for a sample to be scored.
    #[clap(long, value_name = "N")]
    min_snps: Option<usize>,

    /// Worker threads used for scoring.
    #[clap(long, value_name = "N")]
    threads: Option<usize>,

    /// Abort on allele mismatches, duplicate SNPs or unexpected VCF alleles instead
    /// of skipping them.
    #[clap(long)]
    strict: bool,

    /// Hide the progress bar.
    #[clap(long)]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<RunConfig, PipelineError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(panel) = &args.panel {
        config.panel = Some(panel.clone());
    }
    if let Some(min_snps) = args.min_snps {
        config.min_ancestry_snps = min_snps;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if args.strict {
        config.quality.strict_allele_mismatch = true;
        config.quality.strict_duplicates = true;
        config.quality.strict_multiallelic = true;
    }
    config.validate()?;
    Ok(config)
}

fn exit_code(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::Configuration => 2,
        ErrorCategory::Format => 3,
        ErrorCategory::DataQuality => 4,
        ErrorCategory::Io => 5,
        ErrorCategory::Cancelled => 130,
    }
}

fn install_interrupt_handler(cancel: &CancellationToken) {
    let token = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            process::exit(exit_code(ErrorCategory::Cancelled));
        }
        eprintln!("\n> Interrupted, stopping the run...");
        token.cancel();
    });
    if let Err(err) = installed {
        eprintln!("> Warning: Ctrl-C will not stop the run cleanly: {err}");
    }
}

fn report(summary: &RunSummary, args: &Args) {
    let key = summary
        .key_type
        .map(|k| k.to_string())
        .unwrap_or_else(|| "no key".to_string());
    eprintln!(
        "> Matched {} ancestry SNPs by {key}",
        summary.matched_snps
    );
    eprintln!(
        "> Scored {} of {} samples",
        summary.scored_samples, summary.total_samples
    );
    let c = &summary.canonical;
    eprintln!(
        "> Vertices: F ({:.4}, {:.4})  A ({:.4}, {:.4})  E ({:.4}, {:.4})",
        c.f.x, c.f.y, c.a.x, c.a.y, c.e.x, c.e.y
    );
    eprintln!("> Results saved to {}", args.output.display());
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let start = Instant::now();
    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel);

    let outcome = build_config(&args).and_then(|config| {
        eprintln!(
            "> Inferring ancestry for {} with {} threads",
            args.genotype_path.display(),
            config.threads
        );
        pipeline::run(
            &args.genotype_path,
            &args.output,
            &config,
            &cancel,
            !args.quiet,
        )
    });

    match outcome {
        Ok(summary) => {
            report(&summary, &args);
            eprintln!("> Done in {:.2?}", start.elapsed());
        }
        Err(err) => {
            let category = err.category();
            eprintln!("\nError ({category}): {err}");
            process::exit(exit_code(category));
        }
    }
}
