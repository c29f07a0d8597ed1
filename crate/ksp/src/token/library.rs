use std::{
    ffi::{OsStr, c_void},
    mem, ptr,
};

use libloading::Library;
use pkcs11_sys::{
    CK_ATTRIBUTE, CK_C_INITIALIZE_ARGS, CK_FLAGS, CK_FUNCTION_LIST_PTR, CK_OBJECT_HANDLE, CK_RV,
    CK_SESSION_HANDLE, CK_SLOT_ID, CK_SLOT_INFO, CK_TOKEN_INFO, CK_ULONG,
    CKF_OS_LOCKING_OK, CKR_FUNCTION_NOT_SUPPORTED, CKR_OK,
};
use tracing::{debug, warn};

use super::{Attribute, RvResult, SlotInfo, TokenInfo, TokenModule, ck_rv::rv_name};
use crate::error::{KspError, result::KspResult};

type GetFunctionList = unsafe extern "C" fn(*mut CK_FUNCTION_LIST_PTR) -> CK_RV;

/// Call a function of the table, yielding `CKR_FUNCTION_NOT_SUPPORTED` when the module left
/// the entry empty.
macro_rules! p11_call {
    ($lib:expr, $function:ident $(, $arg:expr)* $(,)?) => {
        match $lib.$function {
            #[allow(unsafe_code)]
            Some(function) => unsafe { function($($arg),*) },
            None => CKR_FUNCTION_NOT_SUPPORTED,
        }
    };
}

const fn check(rv: CK_RV) -> RvResult<()> {
    if rv == CKR_OK { Ok(()) } else { Err(rv) }
}

/// A loaded PKCS#11 module.
///
/// The function pointers used by the provider are copied out of the table returned by
/// `C_GetFunctionList`; the library handle is kept so that they stay valid. The module is
/// initialized on load and finalized on drop.
#[allow(non_snake_case)]
pub struct Pkcs11Library {
    C_Initialize: pkcs11_sys::CK_C_Initialize,
    C_Finalize: pkcs11_sys::CK_C_Finalize,
    C_GetSlotList: pkcs11_sys::CK_C_GetSlotList,
    C_GetSlotInfo: pkcs11_sys::CK_C_GetSlotInfo,
    C_GetTokenInfo: pkcs11_sys::CK_C_GetTokenInfo,
    C_OpenSession: pkcs11_sys::CK_C_OpenSession,
    C_CloseSession: pkcs11_sys::CK_C_CloseSession,
    C_FindObjectsInit: pkcs11_sys::CK_C_FindObjectsInit,
    C_FindObjects: pkcs11_sys::CK_C_FindObjects,
    C_FindObjectsFinal: pkcs11_sys::CK_C_FindObjectsFinal,
    C_GetAttributeValue: pkcs11_sys::CK_C_GetAttributeValue,
    // declared last: dropped after `Drop::drop` has called C_Finalize
    _library: Library,
}

impl Pkcs11Library {
    /// Load the module at `path`, resolve its function table and initialize it.
    pub fn load<P: AsRef<OsStr>>(path: P) -> KspResult<Self> {
        let path = path.as_ref();
        #[allow(unsafe_code)]
        let library = unsafe { Library::new(path) }.map_err(|e| {
            KspError::ProviderNotFound(format!("{}: {e}", path.to_string_lossy()))
        })?;

        #[allow(unsafe_code)]
        let get_function_list = unsafe { library.get::<GetFunctionList>(b"C_GetFunctionList") }
            .map(|symbol| *symbol)
            .map_err(|e| {
                KspError::ProviderEntryBad(format!(
                    "C_GetFunctionList in {}: {e}",
                    path.to_string_lossy()
                ))
            })?;

        let mut function_list: CK_FUNCTION_LIST_PTR = ptr::null_mut();
        #[allow(unsafe_code)]
        let rv = unsafe { get_function_list(&raw mut function_list) };
        if rv != CKR_OK || function_list.is_null() {
            return Err(KspError::ProviderDllFail(format!(
                "C_GetFunctionList failed with {}",
                rv_name(rv)
            )));
        }
        #[allow(unsafe_code)]
        let functions = unsafe { &*function_list };

        let p11 = Self {
            C_Initialize: functions.C_Initialize,
            C_Finalize: functions.C_Finalize,
            C_GetSlotList: functions.C_GetSlotList,
            C_GetSlotInfo: functions.C_GetSlotInfo,
            C_GetTokenInfo: functions.C_GetTokenInfo,
            C_OpenSession: functions.C_OpenSession,
            C_CloseSession: functions.C_CloseSession,
            C_FindObjectsInit: functions.C_FindObjectsInit,
            C_FindObjects: functions.C_FindObjects,
            C_FindObjectsFinal: functions.C_FindObjectsFinal,
            C_GetAttributeValue: functions.C_GetAttributeValue,
            _library: library,
        };
        p11.initialize()?;
        debug!("PKCS#11 module {} initialized", path.to_string_lossy());
        Ok(p11)
    }

    fn initialize(&self) -> KspResult<()> {
        let init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let rv = p11_call!(
            self,
            C_Initialize,
            ptr::from_ref(&init_args).cast::<c_void>().cast_mut()
        );
        check(rv).map_err(|rv| {
            KspError::ProviderDllFail(format!("C_Initialize failed with {}", rv_name(rv)))
        })
    }

    fn finalize(&self) -> RvResult<()> {
        check(p11_call!(self, C_Finalize, ptr::null_mut()))
    }
}

impl Drop for Pkcs11Library {
    fn drop(&mut self) {
        if let Err(rv) = self.finalize() {
            warn!("C_Finalize failed with {} [0x{rv:08x}]", rv_name(rv));
        }
    }
}

/// Raw views of a template; the returned vector borrows the buffers of `template`.
/// Build the template handed to the module.
///
/// The declared length of an entry never exceeds the size of its buffer, whatever the previous
/// call left in `len`.
fn raw_template(template: &mut [Attribute]) -> Vec<CK_ATTRIBUTE> {
    template
        .iter_mut()
        .map(|attribute| match attribute.value.as_mut() {
            Some(buffer) => CK_ATTRIBUTE {
                type_: attribute.attr_type,
                ulValueLen: CK_ULONG::try_from(buffer.len())
                    .map_or(attribute.len, |capacity| attribute.len.min(capacity)),
                pValue: buffer.as_mut_ptr().cast::<c_void>(),
            },
            None => CK_ATTRIBUTE {
                type_: attribute.attr_type,
                pValue: ptr::null_mut(),
                ulValueLen: attribute.len,
            },
        })
        .collect()
}

impl TokenModule for Pkcs11Library {
    fn get_slot_list(
        &self,
        token_present: bool,
        slots: Option<&mut [CK_SLOT_ID]>,
    ) -> RvResult<usize> {
        let (list, mut count) = match slots {
            Some(slots) => (
                slots.as_mut_ptr(),
                CK_ULONG::try_from(slots.len()).map_err(|_| CKR_FUNCTION_NOT_SUPPORTED)?,
            ),
            None => (ptr::null_mut(), 0),
        };
        check(p11_call!(
            self,
            C_GetSlotList,
            token_present.into(),
            list,
            &raw mut count
        ))?;
        usize::try_from(count).map_err(|_| CKR_FUNCTION_NOT_SUPPORTED)
    }

    fn get_slot_info(&self, slot: CK_SLOT_ID) -> RvResult<SlotInfo> {
        #[allow(unsafe_code)]
        let mut info: CK_SLOT_INFO = unsafe { mem::zeroed() };
        check(p11_call!(self, C_GetSlotInfo, slot, &raw mut info))?;
        Ok(SlotInfo::from_padded(
            &info.slotDescription,
            &info.manufacturerID,
            info.flags,
        ))
    }

    fn get_token_info(&self, slot: CK_SLOT_ID) -> RvResult<TokenInfo> {
        #[allow(unsafe_code)]
        let mut info: CK_TOKEN_INFO = unsafe { mem::zeroed() };
        check(p11_call!(self, C_GetTokenInfo, slot, &raw mut info))?;
        Ok(TokenInfo {
            label: super::trim_padded(&info.label),
            flags: info.flags,
        })
    }

    fn open_session(&self, slot: CK_SLOT_ID, flags: CK_FLAGS) -> RvResult<CK_SESSION_HANDLE> {
        let mut session: CK_SESSION_HANDLE = 0;
        check(p11_call!(
            self,
            C_OpenSession,
            slot,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session
        ))?;
        Ok(session)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> RvResult<()> {
        check(p11_call!(self, C_CloseSession, session))
    }

    fn find_objects_init(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> RvResult<()> {
        // the module only reads the search template
        let mut template = template.to_vec();
        let mut raw = raw_template(&mut template);
        let count = CK_ULONG::try_from(raw.len()).map_err(|_| CKR_FUNCTION_NOT_SUPPORTED)?;
        check(p11_call!(
            self,
            C_FindObjectsInit,
            session,
            raw.as_mut_ptr(),
            count
        ))
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        max_count: usize,
    ) -> RvResult<Vec<CK_OBJECT_HANDLE>> {
        let mut handles = vec![CK_OBJECT_HANDLE::default(); max_count];
        let mut found: CK_ULONG = 0;
        let max = CK_ULONG::try_from(max_count).map_err(|_| CKR_FUNCTION_NOT_SUPPORTED)?;
        check(p11_call!(
            self,
            C_FindObjects,
            session,
            handles.as_mut_ptr(),
            max,
            &raw mut found
        ))?;
        let found = usize::try_from(found).map_err(|_| CKR_FUNCTION_NOT_SUPPORTED)?;
        handles.truncate(found.min(max_count));
        Ok(handles)
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> RvResult<()> {
        check(p11_call!(self, C_FindObjectsFinal, session))
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [Attribute],
    ) -> CK_RV {
        let mut raw = raw_template(template);
        let Ok(count) = CK_ULONG::try_from(raw.len()) else {
            return CKR_FUNCTION_NOT_SUPPORTED;
        };
        let rv = p11_call!(
            self,
            C_GetAttributeValue,
            session,
            object,
            raw.as_mut_ptr(),
            count
        );
        for (attribute, raw) in template.iter_mut().zip(raw) {
            attribute.len = raw.ulValueLen;
        }
        rv
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use pkcs11_sys::{CK_ULONG, CKA_ID, CKA_LABEL, CKA_VALUE};

    use super::raw_template;
    use crate::token::{Attribute, CK_UNAVAILABLE_INFORMATION};

    #[test]
    fn declared_lengths_never_exceed_the_buffers() {
        let mut template = vec![
            Attribute::with_capacity(CKA_ID, 64),
            Attribute::with_capacity(CKA_VALUE, 16),
            Attribute::query(CKA_LABEL),
        ];
        // lengths reported by a previous call
        template[0].len = CK_UNAVAILABLE_INFORMATION;
        template[1].len = 8;
        template[2].len = 100;

        let raw = raw_template(&mut template);
        assert_eq!(raw[0].ulValueLen, 64);
        assert_eq!(raw[1].ulValueLen, 8);
        assert_eq!(raw[2].ulValueLen, 100);
        assert!(raw[2].pValue.is_null());
        for (raw, attribute) in raw.iter().zip(&template) {
            if let Some(buffer) = &attribute.value {
                assert!(raw.ulValueLen <= CK_ULONG::try_from(buffer.len()).unwrap());
                assert_eq!(raw.pValue.cast_const(), buffer.as_ptr().cast());
            } else {
                assert_eq!(raw.pValue, ptr::null_mut());
            }
        }
    }
}
