pub mod authorization;
pub mod logging;
pub mod transport;
