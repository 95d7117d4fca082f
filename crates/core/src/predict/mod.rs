pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod sampler;

pub use error::{ErrorKind, PredictError};
pub use pipeline::{PipelineOptions, Predictor};
