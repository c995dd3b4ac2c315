use anyhow::{anyhow, bail, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn, LevelFilter};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};
use taskgen_lib::shuffle::{DEFAULT_MAX_SHUFFLES, SEED_BOUND};
use taskgen_lib::tree::CatchWeighting;
use taskgen_lib::{BalancedDesign, GeneratorOptions};
use taskgen_run::{prepare_output_dir, read_config, write_realization, RunConfig};

#[derive(Parser)]
#[command(
    name = "taskgen",
    version,
    about = "Make timing files by building an event tree from a task timing description",
    after_help = "example: taskgen '<30/5> first=[2]; next=[1](2x Left, Right)'"
)]
struct Cli {
    /// Quoted description like "<30/5> first=[2]; next=[1](2x Left, Right)"
    description: Option<String>,
    /// Number of realizations to write [default: 1000]
    #[arg(short = 'i', long)]
    iterations: Option<usize>,
    /// Output directory [default: stims]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Show the parsed structure only; create no files
    #[arg(short = 'n', long = "dry")]
    dry: bool,
    /// Verbosity: 0 errors only, 1 progress, 2-5 debug, above 5 trace
    #[arg(short = 'v', default_value_t = 1)]
    verbosity: u8,
    /// Seed for balancing and for drawing realization seeds
    #[arg(long)]
    seed: Option<u64>,
    /// TOML run configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shuffles tried per realization before giving up [default: 5000]
    #[arg(long)]
    max_shuffle: Option<usize>,
    #[arg(long, value_enum)]
    catch_weighting: Option<CatchMode>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CatchMode {
    #[value(name = "additive")]
    Additive,
    #[value(name = "complementary")]
    Complementary,
}

impl From<CatchMode> for CatchWeighting {
    fn from(mode: CatchMode) -> Self {
        match mode {
            CatchMode::Additive => CatchWeighting::Additive,
            CatchMode::Complementary => CatchWeighting::Complementary,
        }
    }
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2..=5 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(level_for(cli.verbosity))
        .parse_default_env()
        .init();

    let config = match &cli.config {
        Some(path) => read_config(path)?,
        None => RunConfig::default(),
    };
    let text = cli
        .description
        .clone()
        .or_else(|| config.description.clone())
        .ok_or_else(|| anyhow!("no task description given (argument or config 'description')"))?;
    let options = GeneratorOptions {
        catch_weighting: cli
            .catch_weighting
            .map(CatchWeighting::from)
            .or(config.catch_weighting)
            .unwrap_or_default(),
        max_shuffle_iterations: cli
            .max_shuffle
            .or(config.max_shuffle_iterations)
            .unwrap_or(DEFAULT_MAX_SHUFFLES),
        balance_seed: cli.seed.or(config.seed),
    };
    let design = BalancedDesign::from_text(&text, &options)?;

    if cli.dry {
        return cmd_dry_run(&design);
    }
    let iterations = cli.iterations.or(config.iterations).unwrap_or(1000);
    let output = cli
        .output
        .clone()
        .or_else(|| config.output.clone())
        .unwrap_or_else(|| PathBuf::from("stims"));
    cmd_generate(&design, &options, iterations, &output)
}

fn cmd_dry_run(design: &BalancedDesign) -> Result<()> {
    println!("{}", design.text);
    println!("settings: {}", serde_json::to_string_pretty(design.settings())?);
    print!("{}", design.tree.render());
    println!("leaves:");
    for (name, &leaf) in design.tree.leaf_names().iter().zip(design.tree.leaves()) {
        let node = design.tree.node(leaf);
        println!("  {} x{}", name, node.units * design.balance.n_rep_branches);
    }
    println!(
        "{} passes x {} branch visits = {} trials",
        design.balance.n_rep_branches,
        design.balance.nperms,
        design.balance.total_trials()
    );
    println!("labels: {}", serde_json::to_string_pretty(&design.labels())?);
    Ok(())
}

fn cmd_generate(
    design: &BalancedDesign,
    options: &GeneratorOptions,
    iterations: usize,
    output: &Path,
) -> Result<()> {
    if output.exists() && !output.is_dir() {
        bail!("output path {} exists and is not a directory", output.display());
    }
    // surface budget failures before anything is written; random remainders in
    // step pools can still push a later realization over
    let mut seeder = match options.balance_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    design.assemble(&mut StdRng::seed_from_u64(seeder.gen_range(0..SEED_BOUND)))?;
    prepare_output_dir(output)?;

    let mut written = 0;
    let mut skipped = 0;
    for i in 0..iterations {
        let seed = seeder.gen_range(0..SEED_BOUND);
        match design.realize(seed, options.max_shuffle_iterations) {
            Ok(realization) => {
                write_realization(output, design, &realization, options.catch_weighting)?;
                written += 1;
            }
            Err(err) if err.is_realization_local() => {
                warn!("skipping realization: {}", err);
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
        if (i + 1) % 100 == 0 {
            info!("finished {}", i + 1);
        }
    }
    info!(
        "wrote {} realizations to {} ({} skipped)",
        written,
        output.display(),
        skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), LevelFilter::Error);
        assert_eq!(level_for(1), LevelFilter::Info);
        assert_eq!(level_for(3), LevelFilter::Debug);
        assert_eq!(level_for(99), LevelFilter::Trace);
    }

    #[test]
    fn cli_parses_short_flags() {
        let cli = Cli::parse_from(["taskgen", "-o", "out", "-i", "2", "-v", "0", "<10/1> cue=[1]"]);
        assert_eq!(cli.iterations, Some(2));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert_eq!(cli.verbosity, 0);
        assert_eq!(cli.description.as_deref(), Some("<10/1> cue=[1]"));
        assert!(!cli.dry);
    }
}
