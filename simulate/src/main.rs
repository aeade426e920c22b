mod output;

use self::output::Stats;
use clap::{Parser, ValueEnum};
use compute::{NoArgs, Simulate, SimulateBase, SimulateCreate};
use compute_gpu_kernel::KernelArgs;
use data::{parameters::Parameters, Precision, V};
use eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressFinish, ProgressIterator, ProgressStyle};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn, LevelFilter};
use rand::{rngs::StdRng, SeedableRng};
use std::{num::NonZeroUsize, path::PathBuf, time::Duration};
use syslog::Facility;

/// Perform Gray-Scott simulation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Compute backend
    #[arg(short, long, value_enum, default_value_t = Backend::Direct)]
    backend: Backend,

    /// Rate of the process which converts V into P
    #[arg(short, long)]
    killrate: Option<Precision>,

    /// Rate of the process which feeds U and drains U, V and P
    #[arg(short, long)]
    feedrate: Option<Precision>,

    /// Number of images to be computed
    #[arg(short, long, default_value_t = 100)]
    nbimage: usize,

    /// Number of steps to be computed between images
    ///
    /// Steps are computed in pairs, so odd numbers are rounded up.
    #[arg(short = 'e', long, default_value_t = NonZeroUsize::new(34).unwrap())]
    nbextrastep: NonZeroUsize,

    /// Number of rows of the simulation grid
    #[arg(short = 'r', long, default_value_t = 256)]
    nbrow: usize,

    /// Number of columns of the simulation grid
    #[arg(short = 'c', long, default_value_t = 256)]
    nbcol: usize,

    /// Number of layers of the simulation grid
    #[arg(short = 'd', long, default_value_t = 1)]
    nbdepth: usize,

    /// Time interval between two computations
    #[arg(short = 't', long)]
    deltat: Option<Precision>,

    /// Seed of the random number generator that picks the initial blob radius
    #[arg(short, long)]
    seed: Option<u64>,

    /// Path to a PNG picture of the final V concentration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Device backend arguments
    #[command(flatten)]
    kernel: KernelArgs,
}
//
impl Args {
    /// Model parameters, with defaults that clap can't handle
    fn parameters(&self) -> Parameters {
        let default_params = Parameters::default();
        Parameters {
            kill_rate: self.killrate.unwrap_or(default_params.kill_rate),
            feed_rate: self.feedrate.unwrap_or(default_params.feed_rate),
            time_step: self.deltat.unwrap_or(default_params.time_step),
            ..default_params
        }
    }
}

/// Available compute backends
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    /// Straightforward CPU implementation
    Direct,

    /// Kernel program running on a compute device
    Device,
}

fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    match args.backend {
        Backend::Direct => run::<compute_direct::Simulation>(&args, NoArgs {}),
        Backend::Device => run_device(&args),
    }
}

/// Log to syslog, or to stderr if syslog is not available
fn init_logging() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = syslog::init(Facility::default(), level, None) {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();
        warn!("Logging to stderr because syslog is unavailable: {e}");
    }
}

#[cfg(feature = "gpu")]
fn run_device(args: &Args) -> Result<()> {
    use compute_gpu_kernel::{vulkan::VulkanBuilder, Simulation};
    run::<Simulation<VulkanBuilder>>(args, args.kernel.clone())
}

#[cfg(not(feature = "gpu"))]
fn run_device(_args: &Args) -> Result<()> {
    eyre::bail!("The device backend requires a build with the \"gpu\" feature")
}

/// Run the simulation on a given backend
fn run<Simulation: SimulateCreate + Simulate>(
    args: &Args,
    backend_args: Simulation::CliArgs,
) -> Result<()> {
    // Set up the simulation
    let params = args.parameters();
    debug!("Simulating with {params:#?}");
    let mut simulation =
        Simulation::new(params, backend_args).wrap_err("Failed to set up the simulation")?;
    let shape = [args.nbcol, args.nbrow, args.nbdepth];
    simulation
        .allocate(shape)
        .wrap_err("Failed to allocate the simulation grid")?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    simulation
        .initialize_seed(&mut rng)
        .wrap_err("Failed to seed the simulation")?;
    info!("Simulating a {shape:?} grid with the {:?} backend", args.backend);

    // Set up progress reporting
    let progress = ProgressBar::new(args.nbimage as u64)
        .with_message("Computing image")
        .with_style(
            ProgressStyle::with_template("{msg} {pos}/{len} {wide_bar} {elapsed}/~{duration}")
                .expect("Failed to parse style"),
        )
        .with_finish(ProgressFinish::AndClear);
    progress.enable_steady_tick(Duration::from_millis(100));

    // Run the simulation
    let steps_per_image = usize::from(args.nbextrastep);
    for _ in (0..args.nbimage).progress_with(progress) {
        simulation
            .advance(steps_per_image)
            .wrap_err("Failed to compute simulation steps")?;
        let grid = simulation.grid().expect("grid was allocated above");
        let Stats { min, max, mean } = Stats::of(grid, V);
        info!(
            "After {} steps, V ranges from {min} to {max} with mean {mean}",
            simulation.steps_taken()
        );
    }

    // Save a picture of the final state
    if let Some(path) = &args.output {
        let grid = simulation.grid().expect("grid was allocated above");
        output::save_png(grid, V, path)?;
        info!("Saved final V concentration to {}", path.display());
    }
    Ok(())
}
