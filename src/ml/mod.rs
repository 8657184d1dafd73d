pub mod backend;
#[cfg(feature = "ml")]
pub mod burn_backend;
#[cfg(feature = "ml")]
pub mod inference;
#[cfg(feature = "ml")]
pub mod ml_model;
#[cfg(feature = "ml")]
pub mod training;

pub use backend::{
    Architecture, ClassifierBackend, LabeledImage, ModelDescriptor, Prediction,
    PretrainedWeights, TrainedClassifier, TrainerOptions, TrainingProgress,
};
#[cfg(feature = "ml")]
pub use burn_backend::BurnBackend;
#[cfg(feature = "ml")]
pub use ml_model::{load_and_normalize_image_bytes, ImageClassifier, ModelConfig};
