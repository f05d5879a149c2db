//! Small convolutional digit classifiers trained on MNIST with burn:
//! a modified LeNet-5 and a dilated-convolution Context Aggregation Network.

pub mod artifacts;
pub mod backend;
pub mod can;
pub mod cli;
pub mod inference;
pub mod launch;
pub mod lenet;
pub mod mnist;
pub mod model;
pub mod training;

pub mod prelude {
    pub use crate::can::{Can, CanConfig};
    pub use crate::lenet::{LeNet, LeNetConfig};
    pub use crate::model::{Classifier, ModelConfigExt};
    pub use crate::training::{EpochReport, EvalReport, TrainingConfig};
}
