//! Compiler settings threaded into codegen.
//!
//! The core deliberately sees very little configuration. The only switch
//! that changes emitted IR is the EVM version: targets before Cancun have
//! no native `mcopy`, so dynamic memory copies lower to a word loop.
//! Gating of `tload`/`tstore`/`blobhash`/`blobbasefee` is left to the
//! backend assembler.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// EVM hard forks the code generator knows about, oldest first.
///
/// The ordering derive is load-bearing: feature checks are written as
/// `version >= EvmVersion::Cancun`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum EvmVersion {
    London,
    Paris,
    Shanghai,
    Cancun,
    Prague,
}

impl EvmVersion {
    /// Whether the target has the MCOPY opcode (EIP-5656).
    #[must_use]
    pub fn has_mcopy(self) -> bool {
        self >= Self::Cancun
    }
}

/// Settings for one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub evm_version: EvmVersion,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            evm_version: EvmVersion::Cancun,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(EvmVersion::London < EvmVersion::Cancun);
        assert!(!EvmVersion::Shanghai.has_mcopy());
        assert!(EvmVersion::Prague.has_mcopy());
    }

    #[test]
    fn version_names_round_trip() {
        assert_eq!(EvmVersion::Cancun.to_string(), "cancun");
        assert_eq!("paris".parse::<EvmVersion>().unwrap(), EvmVersion::Paris);
    }
}
