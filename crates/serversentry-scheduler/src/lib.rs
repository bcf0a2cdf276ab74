//! Sampler Registry (§4.1) and tick Scheduler (§4.9) for ServerSentry.

pub mod sampler;
pub mod scheduler;

pub use sampler::{CpuSampler, DiskSampler, MemorySampler, ProcessSampler, SampleContext, Sampler, SamplerRegistry};
pub use scheduler::Scheduler;
