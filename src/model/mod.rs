pub mod object_id;
pub mod portfolio;

pub use object_id::*;
pub use portfolio::*;
