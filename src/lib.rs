pub mod classic_markers;
pub mod classify;
pub mod error;
pub mod integrated;
pub mod kmknn;
pub mod loaders;
pub mod markers;
pub mod matrix;
pub mod parallel;
mod profile;
pub mod quantile;
pub mod rank;
pub mod subset;
pub mod train;

pub use classic_markers::{choose_classic_markers, ChooseMarkersOptions};
pub use classify::{classify_single, classify_single_intersect, ClassifyOptions, SingleResult};
pub use error::{Result, SinglePpError};
pub use integrated::{
    classify_integrated, prepare_integrated_input, prepare_integrated_input_intersect, train_integrated,
    IntegratedInput, IntegratedReference, IntegratedResult, TrainedIntegrated,
};
pub use markers::{Intersection, Label, Markers};
pub use matrix::{DenseMatrix, Extracted, ExpressionMatrix, SparseMatrix};
pub use train::{train_single, train_single_intersect, TrainedSingle, TrainedSingleIntersect, TrainingOptions};
