//! Two phase attribute retrieval.
//!
//! `C_GetAttributeValue` is first issued as given. Entries left without a buffer but with a
//! reported length, or a call failing because of a sensitive, unknown or undersized attribute,
//! trigger exactly one retry after buffers have been allocated to the reported lengths.

use std::ffi::c_void;

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE, CK_ULONG, CKA_ALLOWED_MECHANISMS, CKA_UNWRAP_TEMPLATE,
    CKA_WRAP_TEMPLATE, CKR_ATTRIBUTE_SENSITIVE, CKR_ATTRIBUTE_TYPE_INVALID, CKR_BUFFER_TOO_SMALL,
    CKR_OK,
};
use tracing::{error, warn};

use crate::{
    error::{KspError, result::KspResult},
    token::{Attribute, Session, ck_rv::rv_name},
};

fn has_unallocated_buffers(template: &[Attribute]) -> bool {
    template
        .iter()
        .any(|attribute| attribute.value.is_none() && attribute.is_available())
}

/// Size in bytes of the buffer receiving `len` units of an attribute of type `attr_type`.
fn buffer_size(attr_type: CK_ATTRIBUTE_TYPE, len: CK_ULONG) -> KspResult<usize> {
    let unit = match attr_type {
        CKA_WRAP_TEMPLATE | CKA_UNWRAP_TEMPLATE => size_of::<*mut c_void>(),
        CKA_ALLOWED_MECHANISMS => size_of::<CK_ULONG>(),
        _ => 1,
    };
    usize::try_from(len)
        .ok()
        .and_then(|len| len.checked_mul(unit))
        .ok_or(KspError::OutOfMemory)
}

/// Allocate the missing buffers, then declare every buffer at its full size.
fn allocate_buffers(template: &mut [Attribute]) -> KspResult<()> {
    for attribute in template.iter_mut() {
        if attribute.value.is_none() && attribute.is_available() {
            let size = buffer_size(attribute.attr_type, attribute.len)?;
            let mut buffer = Vec::new();
            buffer
                .try_reserve_exact(size)
                .map_err(|_| KspError::OutOfMemory)?;
            buffer.resize(size, 0);
            attribute.value = Some(buffer);
        }
        // the first call may have left CK_UNAVAILABLE_INFORMATION next to a caller buffer
        if let Some(buffer) = &attribute.value {
            attribute.len = CK_ULONG::try_from(buffer.len()).map_err(|_| KspError::OutOfMemory)?;
        }
    }
    Ok(())
}

/// Read the attributes of `object` described by `template`, allocating the value buffers the
/// first call reports as missing.
pub fn load_attributes(
    session: &Session<'_>,
    object: CK_OBJECT_HANDLE,
    template: &mut [Attribute],
) -> KspResult<()> {
    let module = session.module();
    let rv = module.get_attribute_value(session.handle(), object, template);
    match rv {
        CKR_OK if !has_unallocated_buffers(template) => return Ok(()),
        CKR_OK | CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID | CKR_BUFFER_TOO_SMALL => {}
        _ => {
            warn!(
                "C_GetAttributeValue failed with {} [0x{rv:08x}]",
                rv_name(rv)
            );
            return Err(KspError::token("C_GetAttributeValue", rv));
        }
    }

    allocate_buffers(template)?;

    let rv = module.get_attribute_value(session.handle(), object, template);
    match rv {
        CKR_OK => Ok(()),
        CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID | CKR_BUFFER_TOO_SMALL => {
            error!(
                "C_GetAttributeValue failed with {} [0x{rv:08x}] even after buffer allocation",
                rv_name(rv)
            );
            Err(KspError::token("C_GetAttributeValue", rv))
        }
        _ => {
            warn!(
                "C_GetAttributeValue failed with {} [0x{rv:08x}]",
                rv_name(rv)
            );
            Err(KspError::token("C_GetAttributeValue", rv))
        }
    }
}
