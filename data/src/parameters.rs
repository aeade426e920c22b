//! Computation parameters

use crate::Precision;

/// Gray-Scott model parameters
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Parameters {
    /// Diffusion rate of species U (`r_a`)
    pub diffusion_rate_u: Precision,

    /// Diffusion rate of species V (`r_b`)
    pub diffusion_rate_v: Precision,

    /// Speed of the chemical reaction that feeds U and drains U and V (`f`)
    pub feed_rate: Precision,

    /// Rate at which V is removed from the system (`k`)
    pub kill_rate: Precision,

    /// Time step (make it shorter to increase precision)
    pub time_step: Precision,
}
//
impl Default for Parameters {
    fn default() -> Self {
        // "Spots" regime of the Gray-Scott model
        Self {
            diffusion_rate_u: 0.082,
            diffusion_rate_v: 0.041,
            feed_rate: 0.035,
            kill_rate: 0.064,
            time_step: 1.0,
        }
    }
}
