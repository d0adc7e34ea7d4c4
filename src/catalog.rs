//! Device error code catalog.
use std::fmt;

use crate::constants::errors;

/// Category of a flash error reported by the bootloader after a NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// PGSERR: program sequence error.
    Sequence,
    /// PGPERR: programming parallelism does not match the block width.
    Parallelism,
    /// PGAERR: write crosses a row boundary.
    Alignment,
    /// WRPERR: target sector is write protected.
    WriteProtection,
    /// RDPERR: read protection (PCROP) violation.
    ReadProtection,
    /// OPERR: generic flash operation error.
    OperationError,
    /// Any code the catalog does not know, kept verbatim.
    Unknown(u8),
}

/// Total lookup, never fails.
pub const fn describe(code: u8) -> ErrorCategory {
    match code {
        errors::PGSERR => ErrorCategory::Sequence,
        errors::PGPERR => ErrorCategory::Parallelism,
        errors::PGAERR => ErrorCategory::Alignment,
        errors::WRPERR => ErrorCategory::WriteProtection,
        errors::RDPERR => ErrorCategory::ReadProtection,
        errors::OPERR => ErrorCategory::OperationError,
        other => ErrorCategory::Unknown(other),
    }
}

impl ErrorCategory {
    /// The wire code this category was decoded from.
    pub const fn code(&self) -> u8 {
        match *self {
            ErrorCategory::Sequence => errors::PGSERR,
            ErrorCategory::Parallelism => errors::PGPERR,
            ErrorCategory::Alignment => errors::PGAERR,
            ErrorCategory::WriteProtection => errors::WRPERR,
            ErrorCategory::ReadProtection => errors::RDPERR,
            ErrorCategory::OperationError => errors::OPERR,
            ErrorCategory::Unknown(code) => code,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ErrorCategory::Unknown(_))
    }

    pub const fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Sequence => "Programming sequence error",
            ErrorCategory::Parallelism => "Programming parallelism error",
            ErrorCategory::Alignment => "Programming alignment error",
            ErrorCategory::WriteProtection => "Write protection error",
            ErrorCategory::ReadProtection => "Read protection error",
            ErrorCategory::OperationError => "Operation error",
            ErrorCategory::Unknown(_) => "Unrecognized error code",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        let expected = [
            (0xe1, ErrorCategory::Sequence),
            (0xe2, ErrorCategory::Parallelism),
            (0xe3, ErrorCategory::Alignment),
            (0xe4, ErrorCategory::WriteProtection),
            (0xe5, ErrorCategory::ReadProtection),
            (0xe6, ErrorCategory::OperationError),
        ];
        for (code, category) in expected {
            assert_eq!(describe(code), category);
            assert_eq!(category.code(), code);
            assert!(category.is_known());
        }
    }

    #[test]
    fn unknown_code_is_kept() {
        let category = describe(0xff);
        assert_eq!(category, ErrorCategory::Unknown(0xff));
        assert!(!category.is_known());
        assert_eq!(category.code(), 0xff);
        assert_eq!(category.to_string(), "Unrecognized error code (0xff)");
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            ErrorCategory::WriteProtection.to_string(),
            "Write protection error (0xe4)"
        );
    }
}
