//! Benchmarking utilities
//!
//! Please consider using the [`criterion_benchmark!`](crate::criterion_benchmark)
//! macro instead of calling these implementation details directly.

use crate::{Simulate, SimulateCreate};
use clap::{Args, Command, FromArgMatches};
use criterion::{BenchmarkId, Criterion, Throughput};
use data::parameters::Parameters;
use std::{hint::black_box, sync::Once};

/// Re-export criterion for the criterion_benchmark macro
pub use criterion;

// Make sure env_logger is only initialized once
fn init_logger() {
    static INIT_LOGGER: Once = Once::new();
    INIT_LOGGER.call_once(env_logger::init);
}

/// Common criterion benchmark for all reaction-diffusion backends
pub fn criterion_benchmark<Simulation: SimulateCreate + Simulate>(
    c: &mut Criterion,
    backend_name: &str,
) {
    init_logger();

    let args = Simulation::CliArgs::from_arg_matches(
        &Simulation::CliArgs::augment_args(Command::default().no_binary_name(true))
            .get_matches_from(None::<&str>),
    )
    .expect("Failed to parse arguments from defaults & environment");
    let mut sim = Simulation::new(black_box(Parameters::default()), black_box(args))
        .expect("Failed to set up the simulation");

    let mut group = c.benchmark_group(backend_name.to_owned());
    for num_steps_pow2 in 1..=6 {
        let num_steps = 2usize.pow(num_steps_pow2);
        for size_pow2 in 4..=9 {
            let size = 2usize.pow(size_pow2);
            let shape = [2 * size, size, 1];
            let num_cells = (shape[0] * shape[1]) as u64;

            sim.allocate(black_box(shape))
                .expect("Failed to allocate the simulation grid");
            sim.initialize_with_radius(black_box(5.0))
                .expect("Failed to initialize the simulation grid");

            group.throughput(Throughput::Elements(num_cells * num_steps as u64));
            group.bench_function(
                BenchmarkId::from_parameter(format!(
                    "{}x{}cells,{num_steps}steps",
                    shape[0], shape[1]
                )),
                |b| {
                    b.iter(|| sim.advance(num_steps).expect("Failed to advance"));
                },
            );
        }
    }
    group.finish();
}
