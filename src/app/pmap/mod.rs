pub mod handoff;
pub mod monitor;
pub mod parse;
pub mod probe;
pub mod sampler;
pub mod series;
