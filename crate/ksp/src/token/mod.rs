//! The token interface consumed by the provider.
//!
//! [`TokenModule`] is the function table of a PKCS#11 module expressed with Rust types. The
//! production implementation is [`Pkcs11Library`], which loads a shared module and forwards every
//! call to its `C_*` functions. Every method returns the raw `CK_RV` on failure so that call sites
//! can log it with their own context before deciding how to recover.

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_BBOOL, CK_FLAGS, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE,
    CK_SLOT_ID, CK_ULONG, CKF_TOKEN_PRESENT,
};

pub mod ck_rv;
mod library;
mod session;

pub use library::Pkcs11Library;
pub use session::Session;

/// `CK_UNAVAILABLE_INFORMATION`: the length reported for an attribute that cannot be read.
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

pub type RvResult<T> = Result<T, CK_RV>;

/// One entry of an attribute template.
///
/// `value == None` asks the module for the attribute length only. When a buffer is present,
/// `len` is the number of bytes the module may write; after a call it holds the length the module
/// reported (or [`CK_UNAVAILABLE_INFORMATION`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: CK_ATTRIBUTE_TYPE,
    pub value: Option<Vec<u8>>,
    pub len: CK_ULONG,
}

impl Attribute {
    /// A size query: no buffer, the module reports the length.
    #[must_use]
    pub const fn query(attr_type: CK_ATTRIBUTE_TYPE) -> Self {
        Self {
            attr_type,
            value: None,
            len: 0,
        }
    }

    /// A read into a buffer of `capacity` bytes.
    #[must_use]
    pub fn with_capacity(attr_type: CK_ATTRIBUTE_TYPE, capacity: usize) -> Self {
        Self {
            attr_type,
            value: Some(vec![0_u8; capacity]),
            len: capacity as CK_ULONG,
        }
    }

    /// A template entry carrying a value, used for searches.
    #[must_use]
    pub fn bytes(attr_type: CK_ATTRIBUTE_TYPE, value: &[u8]) -> Self {
        Self {
            attr_type,
            value: Some(value.to_vec()),
            len: value.len() as CK_ULONG,
        }
    }

    #[must_use]
    pub fn ulong(attr_type: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Self {
        Self::bytes(attr_type, &value.to_ne_bytes())
    }

    #[must_use]
    pub fn bool(attr_type: CK_ATTRIBUTE_TYPE, value: bool) -> Self {
        Self::bytes(attr_type, &[CK_BBOOL::from(value)])
    }

    /// The module reported a usable length for this entry.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.len != CK_UNAVAILABLE_INFORMATION
    }

    /// The bytes returned by the module, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        if !self.is_available() {
            return None;
        }
        let len = usize::try_from(self.len).ok()?;
        self.value.as_deref().and_then(|v| v.get(..len))
    }

    /// The value decoded as a native `CK_ULONG`.
    #[must_use]
    pub fn as_ulong(&self) -> Option<CK_ULONG> {
        let data = self.data()?;
        let bytes: [u8; size_of::<CK_ULONG>()] = data.try_into().ok()?;
        Some(CK_ULONG::from_ne_bytes(bytes))
    }
}

/// Slot metadata, with the fixed width description trimmed of its space padding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotInfo {
    pub description: String,
    pub manufacturer: String,
    pub flags: CK_FLAGS,
}

impl SlotInfo {
    #[must_use]
    pub fn from_padded(description: &[u8], manufacturer: &[u8], flags: CK_FLAGS) -> Self {
        Self {
            description: trim_padded(description),
            manufacturer: trim_padded(manufacturer),
            flags,
        }
    }

    #[must_use]
    pub const fn token_present(&self) -> bool {
        self.flags & CKF_TOKEN_PRESENT != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenInfo {
    pub label: String,
    pub flags: CK_FLAGS,
}

/// Decode a blank padded PKCS#11 string field: stop at the first NUL, drop trailing spaces.
#[must_use]
pub fn trim_padded(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let field = field.get(..end).unwrap_or_default();
    let trimmed_len = field
        .iter()
        .rposition(|b| *b != b' ')
        .map_or(0, |last| last + 1);
    String::from_utf8_lossy(field.get(..trimmed_len).unwrap_or_default()).into_owned()
}

/// The subset of the PKCS#11 function table the provider drives.
pub trait TokenModule {
    /// Two phase slot listing: with `slots == None` report the number of slots; otherwise fill
    /// `slots` and return how many entries were written.
    fn get_slot_list(
        &self,
        token_present: bool,
        slots: Option<&mut [CK_SLOT_ID]>,
    ) -> RvResult<usize>;

    fn get_slot_info(&self, slot: CK_SLOT_ID) -> RvResult<SlotInfo>;

    fn get_token_info(&self, slot: CK_SLOT_ID) -> RvResult<TokenInfo>;

    fn open_session(&self, slot: CK_SLOT_ID, flags: CK_FLAGS) -> RvResult<CK_SESSION_HANDLE>;

    fn close_session(&self, session: CK_SESSION_HANDLE) -> RvResult<()>;

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute])
    -> RvResult<()>;

    /// Return at most `max_count` handles of the active search.
    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        max_count: usize,
    ) -> RvResult<Vec<CK_OBJECT_HANDLE>>;

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> RvResult<()>;

    /// `C_GetAttributeValue`: updates every entry of `template` in place and returns the raw
    /// status, since partial results are meaningful for some codes.
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [Attribute],
    ) -> CK_RV;
}
