pub mod dataset;
pub mod errors;
pub mod options;
pub mod problem;

pub use dataset::*;
pub use errors::*;
pub use options::*;
pub use problem::*;
