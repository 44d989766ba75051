pub mod model;
pub mod sets_and_parameters;

pub use model::{CoreKey, CoreModel, Variables};
pub use sets_and_parameters::{Pair, Parameters, Sets};
