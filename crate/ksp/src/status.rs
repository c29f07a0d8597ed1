//! Status codes of the key storage provider contract.

use std::fmt::{self, Display, Formatter};

/// A `SECURITY_STATUS` value returned to callers of the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SecurityStatus {
    Success = 0,
    InvalidHandle = 6,
    CallNotImplemented = 120,
    BadKey = 0x8009_0003,
    BadData = 0x8009_0005,
    NoMemory = 0x8009_000E,
    NotFound = 0x8009_0011,
    ProvTypeEntryBad = 0x8009_0018,
    ProviderDllFail = 0x8009_001D,
    ProvDllNotFound = 0x8009_001E,
    Fail = 0x8009_0020,
    InvalidParameter = 0x8009_0027,
    BufferTooSmall = 0x8009_0028,
    NotSupported = 0x8009_0029,
    NoMoreItems = 0x8009_002A,
}

impl SecurityStatus {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "ERROR_SUCCESS",
            Self::InvalidHandle => "ERROR_INVALID_HANDLE",
            Self::CallNotImplemented => "ERROR_CALL_NOT_IMPLEMENTED",
            Self::BadKey => "NTE_BAD_KEY",
            Self::BadData => "NTE_BAD_DATA",
            Self::NoMemory => "NTE_NO_MEMORY",
            Self::NotFound => "NTE_NOT_FOUND",
            Self::ProvTypeEntryBad => "NTE_PROV_TYPE_ENTRY_BAD",
            Self::ProviderDllFail => "NTE_PROVIDER_DLL_FAIL",
            Self::ProvDllNotFound => "NTE_PROV_DLL_NOT_FOUND",
            Self::Fail => "NTE_FAIL",
            Self::InvalidParameter => "NTE_INVALID_PARAMETER",
            Self::BufferTooSmall => "NTE_BUFFER_TOO_SMALL",
            Self::NotSupported => "NTE_NOT_SUPPORTED",
            Self::NoMoreItems => "NTE_NO_MORE_ITEMS",
        }
    }
}

impl Display for SecurityStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} [0x{:08x}]", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::SecurityStatus;

    #[test]
    fn codes_match_the_windows_values() {
        assert_eq!(SecurityStatus::NoMoreItems.code(), 0x8009_002A);
        assert_eq!(SecurityStatus::BadKey.code(), 0x8009_0003);
        assert_eq!(
            SecurityStatus::BufferTooSmall.to_string(),
            "NTE_BUFFER_TOO_SMALL [0x80090028]"
        );
    }
}
