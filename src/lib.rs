//! Full-reference video quality features in the style of the general VQM
//! model: chroma spread/extreme, SI loss/gain, HV loss/gain and contrast x ATI
//! gain, computed slice by slice and collapsed into one score.

pub mod chroma;
pub mod collapse;
pub mod compare;
pub mod contrast;
pub mod edge;
pub mod error;
pub mod plane;
pub mod pooling;
pub mod series;
pub mod spatial;

mod pipeline;

pub use crate::collapse::{CollapsePolicy, CollapseRule, FeatureValues, Reduction, ScoreModel};
pub use crate::error::{Result, VqmError};
pub use crate::pipeline::{LogLevel, PipelineConfig, Vqm, DIAGNOSTICS_TARGET, SLICE_SECONDS};
pub use crate::plane::{Frame, FrameSlice, Plane};
pub use crate::series::{Feature, FeatureSeries, SliceFeatures};
pub use crate::spatial::{Si13Filter, SpatialFilter, SpatialPlanes};
