pub mod backup;
pub mod retention;

pub use backup::*;
pub use retention::*;
