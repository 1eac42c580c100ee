pub mod cleanup;
pub mod ingest;
pub mod probe;
pub mod storage;

pub use cleanup::*;
pub use ingest::*;
pub use probe::*;
pub use storage::*;
