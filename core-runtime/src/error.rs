//! Errors raised while assembling the runtime around a host shell.

use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A configured value is malformed or contradicts another one.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The host did not inject a bridge the engine cannot run without.
    #[error("missing {capability} bridge: {hint}")]
    CapabilityMissing {
        capability: &'static str,
        hint: &'static str,
    },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl Error {
    /// Name of the missing bridge, if that is what went wrong.
    pub fn missing_capability(&self) -> Option<&'static str> {
        match self {
            Error::CapabilityMissing { capability, .. } => Some(*capability),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
