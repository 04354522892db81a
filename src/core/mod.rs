pub mod audio;
pub mod dsp;
pub mod encoder;
pub mod pipeline;
pub mod separator;
pub mod workspace;
