pub mod decision;
pub mod domain;

pub use decision::*;
pub use domain::*;
