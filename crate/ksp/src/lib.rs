//! Copyright 2024 Cosmian Tech SAS

pub use config::{EnumerationLimits, KSP_CONF_ENV, ProviderConfig};
pub use enumeration::{EnumerationState, parse_scope};
pub use error::{KspError, result::KspResult};
pub use key_name::KeyName;
pub use logging::log_init;
pub use property::{Handle, Property, PropertyData, get_property};
pub use provider::{KeyHandle, Provider};
pub use status::SecurityStatus;

pub mod attributes;
pub mod config;
mod enumeration;
pub mod error;
pub mod key_name;
mod logging;
pub mod piv;
mod property;
mod provider;
pub mod status;
pub mod token;
pub mod transport;

#[cfg(test)]
mod tests;
