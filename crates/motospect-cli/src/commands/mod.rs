//! Command implementations for motospect-cli

pub mod call;
pub mod health;
pub mod lifecycle;
pub mod register;
pub mod status;

pub use call::call;
pub use health::health;
pub use lifecycle::{restart, start, stop};
pub use register::register;
pub use status::status;
