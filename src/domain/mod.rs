pub mod alert;
pub mod diagnostic;
pub mod snapshot;

pub use alert::*;
pub use diagnostic::*;
pub use snapshot::*;
