//! Kernel source assembly
//!
//! The simulation kernel is a GLSL compute shader that performs one half-step
//! of the simulation. Everything but the reaction formula is fixed: each work
//! item loads the (u, v) concentrations of one cell, computes their discrete
//! Laplacians with periodic boundaries, evaluates the reaction formula to get
//! `delta_u` and `delta_v`, and writes the forward Euler update of the cell to
//! the output buffer.
//!
//! The formula is pasted in as-is, so a malformed formula will only be noticed
//! when the kernel gets compiled.

use data::{grid::Dimensionality, parameters::Parameters, Precision};

/// Gray-Scott reaction formula
///
/// Formulas can use the local concentrations `u` and `v`, their Laplacians
/// `laplacian_u` and `laplacian_v`, and the model parameters
/// `diffusion_rate_u`, `diffusion_rate_v`, `feed_rate`, `kill_rate` and
/// `time_step`. They must assign `delta_u` and `delta_v`.
pub const GRAY_SCOTT_FORMULA: &str = "\
delta_u = diffusion_rate_u * laplacian_u - u * v * v + feed_rate * (1.0 - u);
delta_v = diffusion_rate_v * laplacian_v + u * v * v - (feed_rate + kill_rate) * v;";

/// Added to Laplacians to keep concentrations away from denormal numbers,
/// which some devices process very slowly
pub const DENORMAL_GUARD: Precision = 1e-6;

/// Default work-group shape
pub const DEFAULT_BLOCK_SHAPE: [u32; 3] = [8, 8, 1];

/// Reaction formula and work-group shape from which the kernel is assembled
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KernelSource {
    /// Kernel language statements that compute `delta_u` and `delta_v`
    formula: String,

    /// Work-group shape, as `[X, Y, Z]`
    block_shape: [u32; 3],
}
//
impl KernelSource {
    /// Describe a kernel
    pub fn new(formula: impl Into<String>, block_shape: [u32; 3]) -> Self {
        Self {
            formula: formula.into(),
            block_shape,
        }
    }

    /// Reaction formula
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Work-group shape
    pub fn block_shape(&self) -> [u32; 3] {
        self.block_shape
    }

    /// Change the reaction formula, telling whether it actually changed
    pub(crate) fn set_formula(&mut self, formula: String) -> bool {
        let changed = formula != self.formula;
        self.formula = formula;
        changed
    }

    /// Change the work-group shape, telling whether it actually changed
    pub(crate) fn set_block_shape(&mut self, block_shape: [u32; 3]) -> bool {
        let changed = block_shape != self.block_shape;
        self.block_shape = block_shape;
        changed
    }

    /// Generate the kernel source text
    ///
    /// Model parameters are baked into the kernel as constants, and the
    /// Laplacian uses 4 neighbors on single-layer grids and 6 otherwise.
    pub fn assemble(&self, params: &Parameters, dimensionality: Dimensionality) -> String {
        let [block_x, block_y, block_z] = self.block_shape;
        let Parameters {
            diffusion_rate_u,
            diffusion_rate_v,
            feed_rate,
            kill_rate,
            time_step,
        } = *params;
        let denormal_guard = DENORMAL_GUARD;
        let (z_neighbors, z_sum, num_neighbors) = match dimensionality {
            Dimensionality::Two => ("", "", 4),
            Dimensionality::Three => (
                "
    uint zm1 = (z + Z - 1u) & (Z - 1u);
    uint zp1 = (z + 1u) & (Z - 1u);",
                "
        + input_uv[X * (Y * zm1 + y) + x]
        + input_uv[X * (Y * zp1 + y) + x]",
                6,
            ),
        };
        let formula = self
            .formula
            .lines()
            .map(|line| format!("    {}", line.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "#version 450

layout(local_size_x = {block_x}, local_size_y = {block_y}, local_size_z = {block_z}) in;

layout(set = 0, binding = 0, std430) readonly buffer Input {{
    vec2 input_uv[];
}};

layout(set = 0, binding = 1, std430) writeonly buffer Output {{
    vec2 output_uv[];
}};

const float diffusion_rate_u = {diffusion_rate_u:?};
const float diffusion_rate_v = {diffusion_rate_v:?};
const float feed_rate = {feed_rate:?};
const float kill_rate = {kill_rate:?};
const float time_step = {time_step:?};
const float denormal_guard = {denormal_guard:?};

void main() {{
    uvec3 global_size = gl_NumWorkGroups * gl_WorkGroupSize;
    uint X = global_size.x;
    uint Y = global_size.y;
    uint Z = global_size.z;
    uint x = gl_GlobalInvocationID.x;
    uint y = gl_GlobalInvocationID.y;
    uint z = gl_GlobalInvocationID.z;
    uint i = X * (Y * z + y) + x;

    vec2 uv = input_uv[i];
    float u = uv.x;
    float v = uv.y;

    // Extents are powers of two, so wrapping around is a bitwise AND
    uint xm1 = (x + X - 1u) & (X - 1u);
    uint xp1 = (x + 1u) & (X - 1u);
    uint ym1 = (y + Y - 1u) & (Y - 1u);
    uint yp1 = (y + 1u) & (Y - 1u);{z_neighbors}

    vec2 laplacian_uv = input_uv[X * (Y * z + y) + xm1]
        + input_uv[X * (Y * z + y) + xp1]
        + input_uv[X * (Y * z + ym1) + x]
        + input_uv[X * (Y * z + yp1) + x]{z_sum}
        - {num_neighbors}.0 * uv;
    float laplacian_u = laplacian_uv.x + denormal_guard;
    float laplacian_v = laplacian_uv.y + denormal_guard;

    float delta_u;
    float delta_v;
{formula}

    output_uv[i] = uv + time_step * vec2(delta_u, delta_v);
}}
"
        )
    }
}
//
impl Default for KernelSource {
    fn default() -> Self {
        Self::new(GRAY_SCOTT_FORMULA, DEFAULT_BLOCK_SHAPE)
    }
}
