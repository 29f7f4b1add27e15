pub mod executor;
pub mod resolver;
pub mod transport;
