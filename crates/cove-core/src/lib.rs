mod model;
mod outcome;

pub use model::*;
pub use outcome::*;
