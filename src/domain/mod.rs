pub mod command;
pub mod network;
pub mod request;

pub use command::*;
pub use network::*;
pub use request::*;
