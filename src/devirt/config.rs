//! Validated analysis configuration.
//!
//! Raw option values (as collected by a command line or a caller) live in
//! [`DevirtOptions`]; [`DevirtConfig::from_options`] is the single place where they are
//! checked and turned into a [`DevirtConfig`]. Every check happens before a trace is opened.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{
    engine::{Flag, GpRegister, RegisterSlice},
    Error, Result,
};

/// Width of the two symbolic inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolWidth {
    /// `dil`/`sil`
    Byte,
    /// `di`/`si`
    Word,
    /// `edi`/`esi`
    Dword,
    /// `rdi`/`rsi`
    Qword,
}

impl SymbolWidth {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            SymbolWidth::Byte => 1,
            SymbolWidth::Word => 2,
            SymbolWidth::Dword => 4,
            SymbolWidth::Qword => 8,
        }
    }

    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// The register slices holding the `x` and `y` inputs.
    #[must_use]
    pub const fn input_slices(self) -> (RegisterSlice, RegisterSlice) {
        (
            GpRegister::Rdi.low(self.bits()),
            GpRegister::Rsi.low(self.bits()),
        )
    }
}

impl TryFrom<u8> for SymbolWidth {
    type Error = Error;

    fn try_from(bytes: u8) -> Result<Self> {
        match bytes {
            1 => Ok(SymbolWidth::Byte),
            2 => Ok(SymbolWidth::Word),
            4 => Ok(SymbolWidth::Dword),
            8 => Ok(SymbolWidth::Qword),
            _ => Err(Error::Configuration(format!(
                "Size of symbolic variables must be equal to: 1, 2, 4, or 8 bytes (got {bytes})"
            ))),
        }
    }
}

impl fmt::Display for SymbolWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.bytes())
    }
}

/// Program point and flag at which the second replay captures the branch predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget {
    /// Address of the instruction that computes the flag.
    pub address: u64,
    /// Flag holding the hidden branch condition.
    pub flag: Flag,
}

impl fmt::Display for BranchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at 0x{:x}", self.flag, self.address)
    }
}

/// Which replay of an analysis run is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    /// Reconnaissance over the first trace: variables are created, heuristics run.
    First,
    /// Replay of the second trace: variables are reseeded, the predicate is captured.
    Second,
}

/// Unvalidated analysis options.
#[derive(Debug, Clone, Default)]
pub struct DevirtOptions {
    /// Trace of the first path (required).
    pub trace1: Option<PathBuf>,
    /// Trace of the second path (enables merging).
    pub trace2: Option<PathBuf>,
    /// Input width in bytes.
    pub symbol_size: Option<u8>,
    /// Virtual-branch instruction address.
    pub branch_address: Option<u64>,
    /// Virtual-branch flag name (`cf`, `af`, `zf`, ...).
    pub branch_flag: Option<String>,
}

/// A validated analysis configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevirtConfig {
    /// Trace of the first path.
    pub trace1: PathBuf,
    /// Trace of the second path, with the branch target used to merge both paths.
    pub trace2: Option<(PathBuf, BranchTarget)>,
    /// Width of the symbolic inputs.
    pub symbol_width: SymbolWidth,
}

impl DevirtConfig {
    /// Single-trace configuration.
    #[must_use]
    pub fn single(trace1: impl Into<PathBuf>, symbol_width: SymbolWidth) -> Self {
        Self {
            trace1: trace1.into(),
            trace2: None,
            symbol_width,
        }
    }

    /// Dual-trace configuration merging both paths at `target`.
    #[must_use]
    pub fn dual(
        trace1: impl Into<PathBuf>,
        trace2: impl Into<PathBuf>,
        symbol_width: SymbolWidth,
        target: BranchTarget,
    ) -> Self {
        Self {
            trace1: trace1.into(),
            trace2: Some((trace2.into(), target)),
            symbol_width,
        }
    }

    /// Validates raw options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the first trace is missing, the symbol size is
    /// not 1, 2, 4, or 8, or a second trace is given without a branch flag, without a branch
    /// address, or with an unknown flag name.
    pub fn from_options(options: DevirtOptions) -> Result<Self> {
        let Some(trace1) = options.trace1 else {
            return Err(Error::Configuration("You must define a VMP trace".to_string()));
        };

        let symbol_width = match options.symbol_size {
            Some(size) => SymbolWidth::try_from(size)?,
            None => {
                return Err(Error::Configuration(
                    "Size of symbolic variables must be equal to: 1, 2, 4, or 8 bytes".to_string(),
                ))
            }
        };

        let Some(trace2) = options.trace2 else {
            if options.branch_flag.is_some() || options.branch_address.is_some() {
                log::warn!("Virtual branch target ignored without a second trace");
            }
            return Ok(Self::single(trace1, symbol_width));
        };

        let Some(flag_name) = options.branch_flag else {
            return Err(Error::Configuration(
                "If you define a second trace, you have to define the virtual branch flag \
                 (e.g: cf, af, zf etc.)"
                    .to_string(),
            ));
        };
        let flag = Flag::from_str(flag_name.trim())
            .map_err(|_| Error::Configuration(format!("Unknown virtual branch flag '{flag_name}'")))?;

        let Some(address) = options.branch_address else {
            return Err(Error::Configuration(
                "If you define a second trace, you have to define the virtual branch address"
                    .to_string(),
            ));
        };

        Ok(Self::dual(
            trace1,
            trace2,
            symbol_width,
            BranchTarget { address, flag },
        ))
    }

    /// The branch target of a dual-trace configuration.
    #[must_use]
    pub fn branch_target(&self) -> Option<BranchTarget> {
        self.trace2.as_ref().map(|(_, target)| *target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DevirtOptions {
        DevirtOptions {
            trace1: Some("a.trace".into()),
            symbol_size: Some(4),
            ..DevirtOptions::default()
        }
    }

    #[test]
    fn symbol_width_accepts_only_power_of_two_bytes() -> Result<()> {
        for (bytes, bits) in [(1u8, 8u32), (2, 16), (4, 32), (8, 64)] {
            let width = SymbolWidth::try_from(bytes)?;
            assert_eq!(width.bits(), bits);
            assert_eq!(width.bytes(), bytes);
        }
        for bytes in [0u8, 3, 5, 16, 255] {
            assert!(matches!(
                SymbolWidth::try_from(bytes),
                Err(Error::Configuration(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn input_slices() {
        let (x, y) = SymbolWidth::Byte.input_slices();
        assert_eq!(x.to_string(), "dil");
        assert_eq!(y.to_string(), "sil");
        let (x, y) = SymbolWidth::Dword.input_slices();
        assert_eq!((x.to_string(), y.to_string()), ("edi".into(), "esi".into()));
    }

    #[test]
    fn single_trace_options() -> Result<()> {
        let config = DevirtConfig::from_options(options())?;
        assert_eq!(config, DevirtConfig::single("a.trace", SymbolWidth::Dword));
        assert_eq!(config.branch_target(), None);
        Ok(())
    }

    #[test]
    fn dual_trace_options() -> Result<()> {
        let config = DevirtConfig::from_options(DevirtOptions {
            trace2: Some("b.trace".into()),
            branch_address: Some(0x1400_0100),
            branch_flag: Some("CF".into()),
            ..options()
        })?;
        assert_eq!(
            config.branch_target(),
            Some(BranchTarget {
                address: 0x1400_0100,
                flag: Flag::Cf
            })
        );
        Ok(())
    }

    #[test]
    fn rejects_incomplete_options() {
        let cases = [
            DevirtOptions {
                trace1: None,
                ..options()
            },
            DevirtOptions {
                symbol_size: None,
                ..options()
            },
            DevirtOptions {
                symbol_size: Some(3),
                ..options()
            },
            DevirtOptions {
                trace2: Some("b.trace".into()),
                branch_address: Some(0x10),
                ..options()
            },
            DevirtOptions {
                trace2: Some("b.trace".into()),
                branch_flag: Some("cf".into()),
                ..options()
            },
            DevirtOptions {
                trace2: Some("b.trace".into()),
                branch_address: Some(0x10),
                branch_flag: Some("rip".into()),
                ..options()
            },
        ];
        for case in cases {
            assert!(matches!(
                DevirtConfig::from_options(case),
                Err(Error::Configuration(_))
            ));
        }
    }
}
