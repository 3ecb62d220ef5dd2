pub mod enhancer;
pub mod geo;

pub use enhancer::*;
pub use geo::*;
