//! Human readable names for `CK_RV` codes and their translation to provider status codes.

use std::borrow::Cow;

use pkcs11_sys::*;

use crate::status::SecurityStatus;

macro_rules! rv_names {
    ($rv:expr; $($name:ident),+ $(,)?) => {
        match $rv {
            $($name => Cow::Borrowed(stringify!($name)),)+
            other => Cow::Owned(format!("unknown 0x{other:x}")),
        }
    };
}

/// Name of a token interface status code; unknown codes render as hexadecimal.
#[must_use]
pub fn rv_name(rv: CK_RV) -> Cow<'static, str> {
    rv_names!(rv;
        CKR_OK,
        CKR_CANCEL,
        CKR_HOST_MEMORY,
        CKR_SLOT_ID_INVALID,
        CKR_GENERAL_ERROR,
        CKR_FUNCTION_FAILED,
        CKR_ARGUMENTS_BAD,
        CKR_NO_EVENT,
        CKR_NEED_TO_CREATE_THREADS,
        CKR_CANT_LOCK,
        CKR_ATTRIBUTE_READ_ONLY,
        CKR_ATTRIBUTE_SENSITIVE,
        CKR_ATTRIBUTE_TYPE_INVALID,
        CKR_ATTRIBUTE_VALUE_INVALID,
        CKR_DATA_INVALID,
        CKR_DATA_LEN_RANGE,
        CKR_DEVICE_ERROR,
        CKR_DEVICE_MEMORY,
        CKR_DEVICE_REMOVED,
        CKR_ENCRYPTED_DATA_INVALID,
        CKR_ENCRYPTED_DATA_LEN_RANGE,
        CKR_FUNCTION_CANCELED,
        CKR_FUNCTION_NOT_PARALLEL,
        CKR_FUNCTION_NOT_SUPPORTED,
        CKR_KEY_HANDLE_INVALID,
        CKR_KEY_SIZE_RANGE,
        CKR_KEY_TYPE_INCONSISTENT,
        CKR_KEY_NOT_NEEDED,
        CKR_KEY_CHANGED,
        CKR_KEY_NEEDED,
        CKR_KEY_INDIGESTIBLE,
        CKR_KEY_FUNCTION_NOT_PERMITTED,
        CKR_KEY_NOT_WRAPPABLE,
        CKR_KEY_UNEXTRACTABLE,
        CKR_MECHANISM_INVALID,
        CKR_MECHANISM_PARAM_INVALID,
        CKR_OBJECT_HANDLE_INVALID,
        CKR_OPERATION_ACTIVE,
        CKR_OPERATION_NOT_INITIALIZED,
        CKR_PIN_INCORRECT,
        CKR_PIN_INVALID,
        CKR_PIN_LEN_RANGE,
        CKR_PIN_EXPIRED,
        CKR_PIN_LOCKED,
        CKR_SESSION_CLOSED,
        CKR_SESSION_COUNT,
        CKR_SESSION_HANDLE_INVALID,
        CKR_SESSION_PARALLEL_NOT_SUPPORTED,
        CKR_SESSION_READ_ONLY,
        CKR_SESSION_EXISTS,
        CKR_SESSION_READ_ONLY_EXISTS,
        CKR_SESSION_READ_WRITE_SO_EXISTS,
        CKR_SIGNATURE_INVALID,
        CKR_SIGNATURE_LEN_RANGE,
        CKR_TEMPLATE_INCOMPLETE,
        CKR_TEMPLATE_INCONSISTENT,
        CKR_TOKEN_NOT_PRESENT,
        CKR_TOKEN_NOT_RECOGNIZED,
        CKR_TOKEN_WRITE_PROTECTED,
        CKR_UNWRAPPING_KEY_HANDLE_INVALID,
        CKR_UNWRAPPING_KEY_SIZE_RANGE,
        CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT,
        CKR_USER_ALREADY_LOGGED_IN,
        CKR_USER_NOT_LOGGED_IN,
        CKR_USER_PIN_NOT_INITIALIZED,
        CKR_USER_TYPE_INVALID,
        CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
        CKR_USER_TOO_MANY_TYPES,
        CKR_WRAPPED_KEY_INVALID,
        CKR_WRAPPED_KEY_LEN_RANGE,
        CKR_WRAPPING_KEY_HANDLE_INVALID,
        CKR_WRAPPING_KEY_SIZE_RANGE,
        CKR_WRAPPING_KEY_TYPE_INCONSISTENT,
        CKR_RANDOM_SEED_NOT_SUPPORTED,
        CKR_RANDOM_NO_RNG,
        CKR_DOMAIN_PARAMS_INVALID,
        CKR_BUFFER_TOO_SMALL,
        CKR_SAVED_STATE_INVALID,
        CKR_INFORMATION_SENSITIVE,
        CKR_STATE_UNSAVEABLE,
        CKR_CRYPTOKI_NOT_INITIALIZED,
        CKR_CRYPTOKI_ALREADY_INITIALIZED,
        CKR_MUTEX_BAD,
        CKR_MUTEX_NOT_LOCKED,
        CKR_FUNCTION_REJECTED,
    )
}

/// Translate a token interface status code to the provider status returned to callers.
#[must_use]
pub fn rv_to_status(rv: CK_RV) -> SecurityStatus {
    match rv {
        CKR_OK => SecurityStatus::Success,
        CKR_HOST_MEMORY | CKR_DEVICE_MEMORY => SecurityStatus::NoMemory,
        CKR_ARGUMENTS_BAD | CKR_SLOT_ID_INVALID => SecurityStatus::InvalidParameter,
        CKR_BUFFER_TOO_SMALL => SecurityStatus::BufferTooSmall,
        CKR_FUNCTION_NOT_SUPPORTED => SecurityStatus::NotSupported,
        CKR_KEY_HANDLE_INVALID | CKR_OBJECT_HANDLE_INVALID => SecurityStatus::BadKey,
        CKR_ATTRIBUTE_TYPE_INVALID | CKR_ATTRIBUTE_VALUE_INVALID | CKR_DATA_INVALID => {
            SecurityStatus::BadData
        }
        _ => SecurityStatus::Fail,
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{CK_RV, CKR_BUFFER_TOO_SMALL, CKR_OK, CKR_TOKEN_NOT_PRESENT};

    use super::{rv_name, rv_to_status};
    use crate::status::SecurityStatus;

    #[test]
    fn known_codes_have_their_symbolic_name() {
        assert_eq!(rv_name(CKR_OK), "CKR_OK");
        assert_eq!(rv_name(CKR_TOKEN_NOT_PRESENT), "CKR_TOKEN_NOT_PRESENT");
        assert_eq!(rv_name(CKR_BUFFER_TOO_SMALL), "CKR_BUFFER_TOO_SMALL");
    }

    #[test]
    fn unknown_codes_fall_back_to_hex() {
        let vendor: CK_RV = 0x8000_1234;
        assert_eq!(rv_name(vendor), "unknown 0x80001234");
        assert_eq!(rv_to_status(vendor), SecurityStatus::Fail);
    }
}
