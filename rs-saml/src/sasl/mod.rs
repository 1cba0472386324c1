pub mod saml;
pub mod sasl;

pub use sasl::*;
pub use saml::*;
