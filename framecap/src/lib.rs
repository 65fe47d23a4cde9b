pub mod captioner;
pub mod frame_extractor;
pub mod pipeline;
pub mod report;
pub mod sampler;
