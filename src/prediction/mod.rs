pub mod decode;
pub mod types;

pub use decode::{DecodePolicy, Decoded, OutputDecoder, RoundingRule};
pub use types::{PredictResponse, Prediction};
