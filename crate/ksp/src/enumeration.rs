//! Key enumeration.
//!
//! The first call of an enumeration scans every slot with a token and records the public keys it
//! finds in a bounded table. Each call then walks the table and returns the next key that has a
//! matching X.509 certificate. One session is kept open across calls as long as consecutive keys
//! live on the same slot.

use pkcs11_sys::{
    CK_KEY_TYPE, CK_OBJECT_CLASS, CK_SLOT_ID, CKA_CERTIFICATE_TYPE, CKA_CLASS, CKA_ID,
    CKA_KEY_TYPE, CKA_LABEL, CKA_VERIFY, CKC_X_509, CKK_RSA, CKK_VENDOR_DEFINED, CKO_CERTIFICATE,
    CKO_PUBLIC_KEY,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    attributes::load_attributes,
    error::{KspError, result::KspResult},
    key_name::{KeyName, MAX_KEY_ID_LEN},
    provider::Provider,
    token::{Attribute, Session, SlotInfo, TokenModule},
};

const SCOPE_PREFIX: &str = "\\\\.\\";
const MAX_READER_NAME_LEN: usize = 64;
const LABEL_BUFFER_LEN: usize = 256;

fn log_slot_error(message: &str, index: usize, slot_id: CK_SLOT_ID, error: &KspError) {
    error!("{message} for slot #{index}({slot_id}), {error}");
}

/// Extract the reader name of a `\\.\<reader>\` scope.
pub fn parse_scope(scope: &str) -> KspResult<&str> {
    let reader = scope
        .strip_prefix(SCOPE_PREFIX)
        .and_then(|rest| rest.strip_suffix('\\'))
        .ok_or_else(|| {
            warn!("Invalid scope '{scope}'");
            KspError::InvalidParameter(format!("invalid scope '{scope}'"))
        })?;
    if reader.is_empty() || reader.len() > MAX_READER_NAME_LEN {
        warn!("Invalid scope '{scope}'");
        return Err(KspError::InvalidParameter(format!(
            "the reader name of scope '{scope}' must hold 1 to {MAX_READER_NAME_LEN} bytes"
        )));
    }
    Ok(reader)
}

fn public_key_template(rsa_only: bool) -> Vec<Attribute> {
    let mut template = vec![
        Attribute::ulong(CKA_CLASS, CKO_PUBLIC_KEY),
        Attribute::bool(CKA_VERIFY, true),
    ];
    if rsa_only {
        template.push(Attribute::ulong(CKA_KEY_TYPE, CKK_RSA));
    }
    template
}

/// Search template of the X.509 certificate sharing the identifier of a key.
pub(crate) fn certificate_template(key_id: &[u8]) -> Vec<Attribute> {
    vec![
        Attribute::ulong(CKA_CLASS, CKO_CERTIFICATE),
        Attribute::ulong(CKA_CERTIFICATE_TYPE, CKC_X_509),
        Attribute::bytes(CKA_ID, key_id),
    ]
}

#[derive(Debug, Clone)]
struct KeyEntry {
    slot_index: usize,
    slot_id: CK_SLOT_ID,
    slot_info: SlotInfo,
    key_type: CK_KEY_TYPE,
    id: Vec<u8>,
}

/// The cursor of one enumeration.
///
/// The key table is built once and never changes afterwards; only the index moves.
pub struct EnumerationState<'p> {
    slot_ids: Vec<CK_SLOT_ID>,
    keys: Vec<KeyEntry>,
    index: usize,
    session: Option<Session<'p>>,
}

impl<'p> EnumerationState<'p> {
    fn build(provider: &'p Provider) -> KspResult<Self> {
        let module = provider.module();
        let config = provider.config();
        let limits = config.limits;

        let count = module.get_slot_list(true, None).map_err(|rv| {
            let e = KspError::token("C_GetSlotList", rv);
            warn!("{e}");
            e
        })?;
        let mut slot_ids = vec![CK_SLOT_ID::default(); count];
        if count > 0 {
            let filled = module
                .get_slot_list(true, Some(&mut slot_ids))
                .map_err(|rv| {
                    let e = KspError::token("C_GetSlotList", rv);
                    warn!("{e}");
                    e
                })?;
            slot_ids.truncate(filled);
        }
        if slot_ids.len() > limits.max_slots {
            debug!(
                "{} slots reported, only the first {} are scanned",
                slot_ids.len(),
                limits.max_slots
            );
            slot_ids.truncate(limits.max_slots);
        }

        debug!("checking {} slots for valid keys...", slot_ids.len());
        let template = public_key_template(config.rsa_only);
        let mut keys = Vec::new();
        for (index, slot_id) in slot_ids.iter().copied().enumerate() {
            if keys.len() >= limits.max_keys {
                debug!("key table full, remaining slots are skipped");
                break;
            }
            let budget = (limits.max_keys - keys.len()).min(limits.max_keys_per_slot);
            collect_slot_keys(module, &template, index, slot_id, budget, &mut keys);
        }
        debug!("{} keys collected", keys.len());

        Ok(Self {
            slot_ids,
            keys,
            index: 0,
            session: None,
        })
    }

    /// Number of slots scanned by this enumeration.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_ids.len()
    }

    /// Number of keys recorded in the table, including those without a certificate.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.index
    }

    fn ensure_session<'s>(
        current: &'s mut Option<Session<'p>>,
        module: &'p dyn TokenModule,
        slot_id: CK_SLOT_ID,
    ) -> KspResult<&'s Session<'p>> {
        let session = match current.take() {
            Some(session) if session.slot_id() == slot_id => session,
            previous => {
                // the previous session is closed before the next one is opened
                drop(previous);
                Session::open(module, slot_id)?
            }
        };
        Ok(&*current.insert(session))
    }

    fn next_key(
        &mut self,
        module: &'p dyn TokenModule,
        reader: Option<&str>,
    ) -> KspResult<KeyName> {
        while let Some(entry) = self.keys.get(self.index) {
            self.index += 1;

            if reader.is_some_and(|reader| entry.slot_info.description != reader) {
                continue;
            }

            let session = match Self::ensure_session(&mut self.session, module, entry.slot_id) {
                Ok(session) => session,
                Err(e) => {
                    log_slot_error("unable to open session", entry.slot_index, entry.slot_id, &e);
                    continue;
                }
            };

            match session.find_object(&certificate_template(&entry.id)) {
                Ok(Some(_)) => {
                    return Ok(KeyName::new(entry.slot_id, &entry.id, entry.key_type));
                }
                Ok(None) => trace!(
                    "no certificate for key {} on slot #{}({})",
                    hex::encode(&entry.id),
                    entry.slot_index,
                    entry.slot_id
                ),
                Err(e) => log_slot_error(
                    "unable to find the certificate",
                    entry.slot_index,
                    entry.slot_id,
                    &e,
                ),
            }
        }
        self.session = None;
        Err(KspError::NoMoreItems)
    }
}

fn collect_slot_keys(
    module: &dyn TokenModule,
    template: &[Attribute],
    index: usize,
    slot_id: CK_SLOT_ID,
    budget: usize,
    keys: &mut Vec<KeyEntry>,
) {
    let slot_info = match module.get_slot_info(slot_id) {
        Ok(info) => info,
        Err(rv) => {
            let e = KspError::token("C_GetSlotInfo", rv);
            log_slot_error("unable to retrieve information", index, slot_id, &e);
            return;
        }
    };
    debug!(
        "collecting keys for slot #{index}({slot_id}) descr='{}' flags=0x{:x}",
        slot_info.description, slot_info.flags
    );

    // the slot list only holds slots with a token, check again anyway
    if !slot_info.token_present() {
        info!("token not present for slot #{index}({slot_id})");
        return;
    }

    match module.get_token_info(slot_id) {
        Ok(token) => debug!("token, label='{}' flags=0x{:x}", token.label, token.flags),
        Err(rv) => {
            let e = KspError::token("C_GetTokenInfo", rv);
            log_slot_error("unable to retrieve token info", index, slot_id, &e);
        }
    }

    let session = match Session::open(module, slot_id) {
        Ok(session) => session,
        Err(e) => {
            log_slot_error("unable to open session", index, slot_id, &e);
            return;
        }
    };

    let objects = match session.find_objects(template, budget) {
        Ok(objects) => objects,
        Err(e) => {
            log_slot_error("unable to find objects", index, slot_id, &e);
            return;
        }
    };
    debug!("slot has {} objects", objects.len());

    for object in objects {
        let mut attributes = [
            Attribute::with_capacity(CKA_ID, MAX_KEY_ID_LEN),
            Attribute::with_capacity(CKA_CLASS, size_of::<CK_OBJECT_CLASS>()),
            Attribute::with_capacity(CKA_LABEL, LABEL_BUFFER_LEN),
            Attribute::with_capacity(CKA_KEY_TYPE, size_of::<CK_KEY_TYPE>()),
        ];
        if let Err(e) = load_attributes(&session, object, &mut attributes) {
            error!("error getting attributes, {e}");
            continue;
        }
        let [id, _, _, key_type] = &attributes;
        let Some(id) = id.data().filter(|id| !id.is_empty()) else {
            debug!("object {object} on slot {slot_id} has no identifier");
            continue;
        };
        keys.push(KeyEntry {
            slot_index: index,
            slot_id,
            slot_info: slot_info.clone(),
            key_type: key_type.as_ulong().unwrap_or(CKK_VENDOR_DEFINED),
            id: id.to_vec(),
        });
    }
}

impl Provider {
    /// Return the next key of an enumeration.
    ///
    /// `state` starts as `None`; the first call builds it and later calls advance it. `scope`
    /// (`\\.\<reader>\`) restricts the results to the keys of one reader. The end of the
    /// enumeration is reported as [`KspError::NoMoreItems`], after which the state can be dropped.
    pub fn enum_keys<'p>(
        &'p self,
        scope: Option<&str>,
        state: &mut Option<EnumerationState<'p>>,
    ) -> KspResult<KeyName> {
        let reader = scope.map(parse_scope).transpose()?;
        if state.is_none() {
            *state = Some(EnumerationState::build(self)?);
        }
        match state.as_mut() {
            Some(state) => state.next_key(self.module(), reader),
            None => Err(KspError::NoMoreItems),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_scope;
    use crate::status::SecurityStatus;

    #[test]
    fn scopes_name_one_reader() {
        assert_eq!(parse_scope("\\\\.\\ReaderA\\").unwrap(), "ReaderA");
        assert_eq!(
            parse_scope("\\\\.\\Yubico YubiKey OTP+FIDO+CCID 00 00\\").unwrap(),
            "Yubico YubiKey OTP+FIDO+CCID 00 00"
        );
    }

    #[test]
    fn malformed_scopes_are_invalid_parameters() {
        for scope in [
            "ReaderA",
            "\\\\.\\ReaderA",
            "\\\\ReaderA\\",
            "\\.\\ReaderA\\",
            "\\\\.\\\\",
            "\\\\.\\",
            "",
        ] {
            let err = parse_scope(scope).unwrap_err();
            assert_eq!(err.status(), SecurityStatus::InvalidParameter, "{scope}");
        }
        let long = format!("\\\\.\\{}\\", "r".repeat(65));
        assert!(parse_scope(&long).is_err());
        let max = format!("\\\\.\\{}\\", "r".repeat(64));
        assert!(parse_scope(&max).is_ok());
    }
}
