pub mod core;
pub mod formulation;
pub mod utils;

pub use self::core::CoreModel;
pub use self::formulation::{Formulation, Values};
