use pkcs11_sys::{CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID, CKF_SERIAL_SESSION};
use tracing::{trace, warn};

use super::{Attribute, TokenModule, ck_rv::rv_name};
use crate::error::{KspError, result::KspResult};

/// A read only session on one slot, closed when dropped.
///
/// At most one of these is alive per discovery pass or property query: the owner drops the
/// previous session before opening the next one.
pub struct Session<'a> {
    module: &'a dyn TokenModule,
    handle: CK_SESSION_HANDLE,
    slot_id: CK_SLOT_ID,
}

impl<'a> Session<'a> {
    pub fn open(module: &'a dyn TokenModule, slot_id: CK_SLOT_ID) -> KspResult<Self> {
        let handle = module
            .open_session(slot_id, CKF_SERIAL_SESSION)
            .map_err(|rv| KspError::token("C_OpenSession", rv))?;
        trace!("opened session {handle} on slot {slot_id}");
        Ok(Self {
            module,
            handle,
            slot_id,
        })
    }

    #[must_use]
    pub const fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    #[must_use]
    pub fn module(&self) -> &'a dyn TokenModule {
        self.module
    }

    /// Return the handles of at most `max_objects` objects matching `template`.
    ///
    /// The search is always finalized once it has been initialized, whether or not the lookup
    /// succeeded.
    pub fn find_objects(
        &self,
        template: &[Attribute],
        max_objects: usize,
    ) -> KspResult<Vec<CK_OBJECT_HANDLE>> {
        self.module
            .find_objects_init(self.handle, template)
            .map_err(|rv| KspError::token("C_FindObjectsInit", rv))?;

        let found = self.collect_objects(max_objects);

        if let Err(rv) = self.module.find_objects_final(self.handle) {
            warn!(
                "C_FindObjectsFinal failed on slot {} with {}",
                self.slot_id,
                rv_name(rv)
            );
        }
        found
    }

    fn collect_objects(&self, max_objects: usize) -> KspResult<Vec<CK_OBJECT_HANDLE>> {
        let mut handles = Vec::new();
        while handles.len() < max_objects {
            let batch = self
                .module
                .find_objects(self.handle, max_objects - handles.len())
                .map_err(|rv| KspError::token("C_FindObjects", rv))?;
            if batch.is_empty() {
                break;
            }
            trace!("found {} objects", batch.len());
            handles.extend(batch);
        }
        handles.truncate(max_objects);
        Ok(handles)
    }

    /// Find the first object matching `template`.
    pub fn find_object(&self, template: &[Attribute]) -> KspResult<Option<CK_OBJECT_HANDLE>> {
        Ok(self.find_objects(template, 1)?.into_iter().next())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        match self.module.close_session(self.handle) {
            Ok(()) => trace!("closed session {} on slot {}", self.handle, self.slot_id),
            Err(rv) => warn!(
                "C_CloseSession failed for session {} on slot {} with {}",
                self.handle,
                self.slot_id,
                rv_name(rv)
            ),
        }
    }
}
