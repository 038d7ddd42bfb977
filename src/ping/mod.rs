pub mod engine;
pub mod interrupt;
pub mod transport;

pub use crate::error::PingError;
pub use engine::*;
pub use interrupt::*;
pub use transport::*;
