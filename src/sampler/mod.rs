mod controller;
mod loop_worker;

pub use controller::SamplerDriver;
pub use loop_worker::{flush_loop, sampler_loop};
