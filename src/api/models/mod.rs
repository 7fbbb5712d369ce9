pub mod accounts;
pub mod catalog;
pub mod common;
pub mod system;

pub use accounts::*;
pub use catalog::*;
pub use common::*;
pub use system::*;
