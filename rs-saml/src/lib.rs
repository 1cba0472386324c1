pub mod auth;
pub mod browser;
pub mod codec;
pub mod error;
pub mod sasl;
pub mod transport;

pub use auth::{authenticate, authenticate_with_codec, Driver};
pub use error::{Error, Result};
