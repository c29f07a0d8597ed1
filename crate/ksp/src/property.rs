//! Handle properties.
//!
//! A property is resolved into [`PropertyData`]: the value itself, or only its size when the
//! caller asked for the size and computing the value is costly. [`get_property`] applies the
//! caller buffer convention on top: no buffer asks for the required size, an undersized buffer
//! fails with [`KspError::BufferTooSmall`] carrying that size.

use std::{iter, str::FromStr};

use pkcs11_sys::{CKA_LABEL, CKA_VALUE};
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, error};

use crate::{
    attributes::load_attributes,
    enumeration::certificate_template,
    error::{KspError, result::KspResult},
    ksp_bail,
    piv::{self, PIV_NAME_PROPERTY_SIZE},
    provider::{KeyHandle, Provider},
    token::{Attribute, Session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum Property {
    /// DER encoded X.509 certificate of the key
    #[strum(serialize = "SmartCardKeyCertificate")]
    Certificate,
    /// Display name of the key
    #[strum(serialize = "Name")]
    Name,
    /// Description of the slot holding the key
    #[strum(serialize = "SmartCardReader")]
    Reader,
    /// Numeric slot id, as a 32-bit value
    #[strum(serialize = "SmartCardSlotId")]
    SlotId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyData {
    Bytes(Vec<u8>),
    Size(usize),
}

impl PropertyData {
    #[must_use]
    pub fn required_size(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Size(size) => *size,
        }
    }
}

/// The handles whose properties can be read.
#[derive(Clone, Copy)]
pub enum Handle<'a> {
    Provider(&'a Provider),
    Key(&'a KeyHandle<'a>),
}

/// Read the property `name` of `handle` into `output`.
///
/// Returns the size of the value when `output` is `None`, and the number of bytes written
/// otherwise.
pub fn get_property(handle: Handle<'_>, name: &str, output: Option<&mut [u8]>) -> KspResult<usize> {
    match handle {
        Handle::Provider(_) => Err(KspError::NotImplemented(format!(
            "provider property {name}"
        ))),
        Handle::Key(key) => {
            let property = Property::from_str(name)
                .map_err(|_| KspError::NotSupported(format!("key property {name}")))?;
            key.get_property(property, output)
        }
    }
}

fn write_output(data: PropertyData, output: Option<&mut [u8]>) -> KspResult<usize> {
    let required = data.required_size();
    match (data, output) {
        (_, None) => Ok(required),
        (PropertyData::Size(_), Some(_)) => ksp_bail!(KspError::BufferTooSmall { required }),
        (PropertyData::Bytes(bytes), Some(output)) => {
            output
                .get_mut(..bytes.len())
                .ok_or(KspError::BufferTooSmall { required })?
                .copy_from_slice(&bytes);
            Ok(required)
        }
    }
}

/// NUL terminated UTF-16LE.
fn to_utf16_nul(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn from_utf16_nul(bytes: &[u8]) -> KspResult<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .filter_map(|pair| pair.try_into().ok().map(u16::from_le_bytes))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units).map_err(|e| KspError::BadData(e.to_string()))
}

impl KeyHandle<'_> {
    /// Read a property following the caller buffer convention, see [`get_property`].
    pub fn get_property(&self, property: Property, output: Option<&mut [u8]>) -> KspResult<usize> {
        let capacity = output.as_deref().map(<[u8]>::len);
        let data = self.property(property, capacity)?;
        write_output(data, output)
    }

    /// Resolve a property for a caller buffer of `capacity` bytes, `None` for a size query.
    pub fn property(&self, property: Property, capacity: Option<usize>) -> KspResult<PropertyData> {
        debug!("get property {property} of key {}", self.key_name());
        match property {
            Property::Reader => Ok(PropertyData::Bytes(to_utf16_nul(&self.reader()?))),
            Property::SlotId => Ok(PropertyData::Bytes(
                self.slot_id_property()?.to_ne_bytes().to_vec(),
            )),
            Property::Certificate => Ok(PropertyData::Bytes(self.certificate()?)),
            Property::Name => self.name_data(capacity),
        }
    }

    /// Trimmed description of the slot holding the key.
    pub fn reader(&self) -> KspResult<String> {
        let info = self
            .provider
            .module()
            .get_slot_info(self.slot_id)
            .map_err(|rv| {
                let e = KspError::token("C_GetSlotInfo", rv);
                error!("unable to retrieve information for slot {}, {e}", self.slot_id);
                e
            })?;
        Ok(info.description)
    }

    pub fn slot_id_property(&self) -> KspResult<u32> {
        u32::try_from(self.slot_id).map_err(|_| {
            KspError::BadData(format!("slot id {} does not fit in 32 bits", self.slot_id))
        })
    }

    /// DER bytes of the certificate of the key.
    pub fn certificate(&self) -> KspResult<Vec<u8>> {
        self.read_certificate_attribute(Attribute::query(CKA_VALUE))
    }

    /// Display name of the key: the PIV container name on PIV cards, the certificate label
    /// otherwise.
    pub fn name(&self) -> KspResult<String> {
        match self.name_data(Some(usize::MAX))? {
            PropertyData::Bytes(bytes) => from_utf16_nul(&bytes),
            PropertyData::Size(required) => Err(KspError::BufferTooSmall { required }),
        }
    }

    fn name_data(&self, capacity: Option<usize>) -> KspResult<PropertyData> {
        let label = self.read_certificate_attribute(Attribute::query(CKA_LABEL))?;
        let Some(tag) = piv::piv_tag_for_label(&label) else {
            return Ok(PropertyData::Bytes(to_utf16_nul(&String::from_utf8_lossy(
                &label,
            ))));
        };

        // the size of a PIV name is known without talking to the card
        match capacity {
            None => Ok(PropertyData::Size(PIV_NAME_PROPERTY_SIZE)),
            Some(capacity) if capacity < PIV_NAME_PROPERTY_SIZE => Err(KspError::BufferTooSmall {
                required: PIV_NAME_PROPERTY_SIZE,
            }),
            Some(_) => {
                let transport = self.provider.card_transport().ok_or_else(|| {
                    KspError::BadKey("no card transport to resolve the PIV container name".to_owned())
                })?;
                let reader = self.reader().map_err(|e| KspError::BadKey(e.to_string()))?;
                let name = piv::resolve_container_name(transport, &reader, tag)?;
                Ok(PropertyData::Bytes(to_utf16_nul(&name)))
            }
        }
    }

    /// Read one attribute of the certificate of the key, within a session closed on return.
    fn read_certificate_attribute(&self, attribute: Attribute) -> KspResult<Vec<u8>> {
        let log_error = |operation: &str, e: &KspError| {
            error!("{operation} for key {} on slot {}, {e}", self.key_name(), self.slot_id);
        };
        let session = Session::open(self.provider.module(), self.slot_id)
            .inspect_err(|e| log_error("unable to open session", e))?;
        let certificate = session
            .find_object(&certificate_template(&self.key_id))
            .inspect_err(|e| log_error("unable to find the certificate", e))?
            .ok_or_else(|| {
                debug!("no certificate for key {} on slot {}", self.key_name(), self.slot_id);
                KspError::NotFound(format!("no certificate for key {}", self.key_name()))
            })?;
        let mut template = [attribute];
        load_attributes(&session, certificate, &mut template)
            .inspect_err(|e| log_error("unable to read the certificate attribute", e))?;
        let [attribute] = template;
        attribute.data().map(<[u8]>::to_vec).ok_or_else(|| {
            KspError::NotFound(format!(
                "attribute 0x{:x} of the certificate of key {} is unavailable",
                attribute.attr_type,
                self.key_name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{Property, PropertyData, from_utf16_nul, to_utf16_nul, write_output};
    use crate::error::KspError;

    #[test]
    fn property_names() {
        assert_eq!(
            Property::from_str("SmartCardKeyCertificate").unwrap(),
            Property::Certificate
        );
        assert_eq!(Property::from_str("SmartCardSlotId").unwrap(), Property::SlotId);
        assert_eq!(Property::Reader.to_string(), "SmartCardReader");
        assert!(Property::from_str("Algorithm Group").is_err());
    }

    #[test]
    fn utf16_strings_are_nul_terminated() {
        let bytes = to_utf16_nul("Reader");
        assert_eq!(bytes.len(), 2 * ("Reader".len() + 1));
        assert_eq!(&bytes[..2], &[b'R', 0]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
        assert_eq!(from_utf16_nul(&bytes).unwrap(), "Reader");
    }

    #[test]
    fn output_buffer_convention() {
        let data = PropertyData::Bytes(vec![1, 2, 3]);
        assert_eq!(write_output(data.clone(), None).unwrap(), 3);

        let mut small = [0_u8; 2];
        assert!(matches!(
            write_output(data.clone(), Some(&mut small)),
            Err(KspError::BufferTooSmall { required: 3 })
        ));

        let mut large = [0_u8; 8];
        assert_eq!(write_output(data, Some(&mut large)).unwrap(), 3);
        assert_eq!(&large[..4], &[1, 2, 3, 0]);

        assert_eq!(write_output(PropertyData::Size(74), None).unwrap(), 74);
    }
}
