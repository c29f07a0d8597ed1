//! Key names: `\<slot id>\<key id>`, both hex encoded.
//!
//! The slot id is written most significant byte first over the full width of `CK_SLOT_ID`,
//! so a name always decodes back to the exact `(slot id, key id)` pair it was built from.

use pkcs11_sys::{
    CK_KEY_TYPE, CK_SLOT_ID, CKK_DES, CKK_DES3, CKK_DH, CKK_DSA, CKK_EC, CKK_RC2, CKK_RC4, CKK_RSA,
};

use crate::error::{KspError, result::KspResult};

/// Upper bound on the length of a key identifier.
pub const MAX_KEY_ID_LEN: usize = 64;

const SLOT_ID_HEX_LEN: usize = 2 * size_of::<CK_SLOT_ID>();

/// `AT_KEYEXCHANGE | AT_SIGNATURE`
pub const LEGACY_KEY_SPEC: u32 = 0x1 | 0x2;
/// `NCRYPT_MACHINE_KEY_FLAG`
pub const MACHINE_KEY_FLAG: u32 = 0x20;

/// A key returned by an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyName {
    pub name: String,
    /// Algorithm identifier derived from the key type; empty when not recognized.
    pub algorithm: &'static str,
    pub legacy_key_spec: u32,
    pub flags: u32,
}

impl KeyName {
    #[must_use]
    pub fn new(slot_id: CK_SLOT_ID, key_id: &[u8], key_type: CK_KEY_TYPE) -> Self {
        Self {
            name: encode(slot_id, key_id),
            algorithm: algorithm_name(key_type),
            legacy_key_spec: LEGACY_KEY_SPEC,
            flags: MACHINE_KEY_FLAG,
        }
    }
}

#[must_use]
pub const fn algorithm_name(key_type: CK_KEY_TYPE) -> &'static str {
    match key_type {
        CKK_RSA => "RSA",
        CKK_DSA => "DSA",
        CKK_DH => "DH",
        CKK_EC => "ECDSA",
        CKK_RC2 => "RC2",
        CKK_RC4 => "RC4",
        CKK_DES => "DES",
        CKK_DES3 => "3DES",
        _ => "",
    }
}

#[must_use]
pub fn encode(slot_id: CK_SLOT_ID, key_id: &[u8]) -> String {
    format!(
        "\\{}\\{}",
        hex::encode(slot_id.to_be_bytes()),
        hex::encode(key_id)
    )
}

/// Decode a key name into its slot id and key identifier.
pub fn decode(name: &str) -> KspResult<(CK_SLOT_ID, Vec<u8>)> {
    let rest = name
        .strip_prefix('\\')
        .ok_or_else(|| KspError::BadKey(format!("{name}: missing leading separator")))?;
    let (slot_hex, key_hex) = rest
        .split_once('\\')
        .ok_or_else(|| KspError::BadKey(format!("{name}: missing key id separator")))?;

    if slot_hex.len() != SLOT_ID_HEX_LEN {
        return Err(KspError::BadKey(format!(
            "{name}: the slot id must be {SLOT_ID_HEX_LEN} hex digits"
        )));
    }
    let mut slot_bytes = [0_u8; size_of::<CK_SLOT_ID>()];
    hex::decode_to_slice(slot_hex, &mut slot_bytes)
        .map_err(|e| KspError::BadKey(format!("{name}: invalid slot id: {e}")))?;

    if key_hex.is_empty() || key_hex.len() > 2 * MAX_KEY_ID_LEN {
        return Err(KspError::BadKey(format!(
            "{name}: the key id must hold 1 to {MAX_KEY_ID_LEN} bytes"
        )));
    }
    let key_id =
        hex::decode(key_hex).map_err(|e| KspError::BadKey(format!("{name}: invalid key id: {e}")))?;

    Ok((CK_SLOT_ID::from_be_bytes(slot_bytes), key_id))
}
