use pkcs11_sys::CK_RV;
use thiserror::Error;

use crate::{status::SecurityStatus, token::ck_rv};

pub mod result;

// Each error must map to a status code of the provider contract (see `KspError::status`)
#[derive(Error, Debug)]
pub enum KspError {
    // Host memory allocation failed (CKR_HOST_MEMORY)
    #[error("out of memory")]
    OutOfMemory,

    // Malformed caller input, detected before any token call
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    // The key name does not decode or the key cannot be resolved
    #[error("bad key: {0}")]
    BadKey(String),

    // A value does not fit the range of the external representation
    #[error("bad data: {0}")]
    BadData(String),

    // The caller buffer is too small; `required` is the size to retry with
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("not found: {0}")]
    NotFound(String),

    // End of a key enumeration
    #[error("no more items")]
    NoMoreItems,

    // Loading a token module
    #[error("PKCS#11 module not found: {0}")]
    ProviderNotFound(String),

    #[error("PKCS#11 module entry point missing: {0}")]
    ProviderEntryBad(String),

    #[error("PKCS#11 module failed: {0}")]
    ProviderDllFail(String),

    // A token interface call returned a non success code
    #[error("{operation} failed with {}", ck_rv::rv_name(*.rv))]
    Token { operation: String, rv: CK_RV },

    #[error("configuration error: {0}")]
    Config(String),

    // Other errors
    #[error("{0}")]
    Default(String),
}

impl KspError {
    pub fn token(operation: &str, rv: CK_RV) -> Self {
        Self::Token {
            operation: operation.to_owned(),
            rv,
        }
    }

    /// The status code the provider contract returns for this error.
    #[must_use]
    pub fn status(&self) -> SecurityStatus {
        match self {
            Self::OutOfMemory => SecurityStatus::NoMemory,
            Self::InvalidParameter(_) | Self::Config(_) => SecurityStatus::InvalidParameter,
            Self::BadKey(_) => SecurityStatus::BadKey,
            Self::BadData(_) => SecurityStatus::BadData,
            Self::BufferTooSmall { .. } => SecurityStatus::BufferTooSmall,
            Self::NotSupported(_) => SecurityStatus::NotSupported,
            Self::NotImplemented(_) => SecurityStatus::CallNotImplemented,
            Self::NotFound(_) => SecurityStatus::NotFound,
            Self::NoMoreItems => SecurityStatus::NoMoreItems,
            Self::ProviderNotFound(_) => SecurityStatus::ProvDllNotFound,
            Self::ProviderEntryBad(_) => SecurityStatus::ProvTypeEntryBad,
            Self::ProviderDllFail(_) => SecurityStatus::ProviderDllFail,
            Self::Token { rv, .. } => ck_rv::rv_to_status(*rv),
            Self::Default(_) => SecurityStatus::Fail,
        }
    }
}

impl From<toml::de::Error> for KspError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! ksp_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::ksp_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::ksp_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a generic error from a string.
#[macro_export]
macro_rules! ksp_error {
    ($msg:literal) => {
        $crate::error::KspError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::error::KspError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::KspError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! ksp_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::ksp_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::ksp_error!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{CKR_DEVICE_REMOVED, CKR_HOST_MEMORY};

    use super::KspError;
    use crate::{
        error::result::KspResult,
        status::SecurityStatus,
    };

    #[test]
    fn token_errors_map_through_the_rv_table() {
        assert_eq!(
            KspError::token("C_OpenSession", CKR_HOST_MEMORY).status(),
            SecurityStatus::NoMemory
        );
        assert_eq!(
            KspError::token("C_OpenSession", CKR_DEVICE_REMOVED).status(),
            SecurityStatus::Fail
        );
        assert_eq!(
            KspError::token("C_OpenSession", CKR_DEVICE_REMOVED).to_string(),
            "C_OpenSession failed with CKR_DEVICE_REMOVED"
        );
    }

    fn ensure_positive(value: i32) -> KspResult<i32> {
        ksp_ensure!(value >= 0, "negative value {}", value);
        if value == 0 {
            ksp_bail!(KspError::InvalidParameter("zero".to_owned()));
        }
        Ok(value)
    }

    #[test]
    fn error_macros() {
        assert_eq!(ensure_positive(3).unwrap(), 3);
        assert_eq!(
            ensure_positive(-1).unwrap_err().to_string(),
            ksp_error!("negative value -1").to_string()
        );
        assert_eq!(
            ensure_positive(0).unwrap_err().status(),
            SecurityStatus::InvalidParameter
        );
        assert_eq!(
            ensure_positive(-1).unwrap_err().status(),
            SecurityStatus::Fail
        );
    }

    #[test]
    fn buffer_too_small_keeps_the_required_size() {
        let err = KspError::BufferTooSmall { required: 74 };
        assert_eq!(err.status(), SecurityStatus::BufferTooSmall);
        assert!(err.to_string().contains("74"));
    }
}
