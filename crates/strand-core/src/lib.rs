pub mod error;
pub mod flags;
pub mod ir;
pub mod types;

pub use error::StrandError;
pub use flags::DebugFlags;
pub use ir::*;
pub use types::*;
