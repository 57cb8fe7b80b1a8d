pub mod candle;
pub mod decision;
pub mod direction;
pub mod features;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use decision::GateDecision;
pub use direction::*;
pub use features::{FeatureSnapshot, TimeframeFeatures};
pub use timeframe::Timeframe;
