//! CLI parameters

use crate::source::{self, KernelSource};
use clap::Args;
use std::{num::NonZeroU32, path::PathBuf};

/// CLI parameters of the device-kernel compute backend
#[derive(Args, Clone, Debug, Eq, Hash, PartialEq)]
pub struct KernelArgs {
    /// Number of columns processed by each device work group
    ///
    /// The number of simulated columns must be a multiple of this.
    #[arg(long, env, default_value_t = NonZeroU32::new(8).unwrap())]
    pub block_cols: NonZeroU32,

    /// Number of rows processed by each device work group
    ///
    /// The number of simulated rows must be a multiple of this.
    #[arg(long, env, default_value_t = NonZeroU32::new(8).unwrap())]
    pub block_rows: NonZeroU32,

    /// Number of layers processed by each device work group
    ///
    /// The number of simulated layers must be a multiple of this.
    #[arg(long, env, default_value_t = NonZeroU32::new(1).unwrap())]
    pub block_layers: NonZeroU32,

    /// File containing the reaction formula, in GLSL syntax
    ///
    /// The formula must assign `delta_u` and `delta_v`. Gray-Scott reaction
    /// terms are used by default.
    #[arg(long, env)]
    pub formula_file: Option<PathBuf>,
}
//
impl KernelArgs {
    /// Load the kernel description
    pub fn kernel_source(&self) -> std::io::Result<KernelSource> {
        let formula = match &self.formula_file {
            Some(path) => std::fs::read_to_string(path)?,
            None => source::GRAY_SCOTT_FORMULA.to_owned(),
        };
        Ok(KernelSource::new(
            formula,
            [
                self.block_cols.get(),
                self.block_rows.get(),
                self.block_layers.get(),
            ],
        ))
    }
}
//
impl Default for KernelArgs {
    fn default() -> Self {
        let [cols, rows, layers] = source::DEFAULT_BLOCK_SHAPE.map(|extent| {
            NonZeroU32::new(extent).expect("default block extents are nonzero")
        });
        Self {
            block_cols: cols,
            block_rows: rows,
            block_layers: layers,
            formula_file: None,
        }
    }
}
