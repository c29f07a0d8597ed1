//! PIV container names.
//!
//! Keys of a PIV card are known to Windows under a container name derived from the card GUID
//! (read from the CHUID data object) and the data object tag of the key certificate. The name is
//! recovered here by talking to the card directly.

use tracing::{debug, warn};

use crate::{
    error::{KspError, result::KspResult},
    transport::{CardChannel, CardTransport},
};

mod tlv;

pub use tlv::{Tlv, TlvReader};

/// Length of a container name: `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
pub const PIV_CONTAINER_NAME_LEN: usize = 36;

/// Size of the name property of a PIV key: NUL terminated UTF-16.
pub const PIV_NAME_PROPERTY_SIZE: usize = (PIV_CONTAINER_NAME_LEN + 1) * size_of::<u16>();

/// Certificate labels of the PIV key slots and the tags of their data objects.
const PIV_CERT_TAGS: [(&str, [u8; 3]); 4] = [
    ("Certificate for PIV Authentication", [0x5F, 0xC1, 0x05]),
    ("Certificate for Digital Signature", [0x5F, 0xC1, 0x0A]),
    ("Certificate for Key Management", [0x5F, 0xC1, 0x0B]),
    ("Certificate for Card Authentication", [0x5F, 0xC1, 0x01]),
];

pub const APDU_PIV_SELECT_AID: [u8; 15] = [
    0x00, 0xA4, 0x04, 0x00, 0x09, 0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x00,
];
pub const APDU_PIV_GET_CHUID: [u8; 11] = [
    0x00, 0xCB, 0x3F, 0xFF, 0x05, 0x5C, 0x03, 0x5F, 0xC1, 0x02, 0x00,
];

const CHUID_TAG: u8 = 0x53;
const CHUID_GUID_TAG: u8 = 0x34;
const GUID_LEN: usize = 16;

/// The data object tag for a certificate label, when the label is one of the PIV labels.
///
/// Trailing NUL bytes of the token label are ignored; anything else must match exactly.
#[must_use]
pub fn piv_tag_for_label(label: &[u8]) -> Option<[u8; 3]> {
    let end = label
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    let label = label.get(..end)?;
    PIV_CERT_TAGS
        .iter()
        .find(|(known, _)| known.as_bytes() == label)
        .map(|(_, tag)| *tag)
}

/// Strip the status word of a response, accepting `90 00` and `61 xx`.
fn check_status(response: &[u8]) -> Option<&[u8]> {
    let (data, status) = response.split_last_chunk::<2>()?;
    match status {
        [0x90, 0x00] | [0x61, _] => Some(data),
        _ => None,
    }
}

fn exchange(channel: &mut dyn CardChannel, apdu: &[u8]) -> KspResult<Vec<u8>> {
    let response = channel
        .transmit(apdu)
        .map_err(|e| KspError::BadKey(e.to_string()))?;
    let data = check_status(&response).ok_or_else(|| {
        KspError::BadKey(format!(
            "card answered APDU {} with status {}",
            hex::encode(apdu.get(..4).unwrap_or(apdu)),
            hex::encode(response.get(response.len().saturating_sub(2)..).unwrap_or_default())
        ))
    })?;
    Ok(data.to_vec())
}

/// Extract the GUID of a CHUID data object.
///
/// Cards answer with the first part of a large signed CHUID and `61 xx`; the entries present in
/// that part are enough as long as the GUID is among them.
#[must_use]
pub fn chuid_guid(chuid: &[u8]) -> Option<[u8; GUID_LEN]> {
    let outer = TlvReader::new(chuid).read_partial()?;
    if outer.tag != CHUID_TAG {
        return None;
    }
    let guid = TlvReader::new(outer.value).find(|entry| entry.tag == CHUID_GUID_TAG)?;
    guid.value.try_into().ok()
}

/// Format a container name from a card GUID and a certificate data object tag.
#[must_use]
pub fn container_name(guid: &[u8; GUID_LEN], tag: [u8; 3]) -> String {
    let p = guid;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        p[3], p[2], p[1], p[0], p[5], p[4], p[7], p[6], p[8], p[9], p[10], p[11], p[12], tag[0],
        tag[1], tag[2]
    )
}

/// Read the CHUID of the card in `reader` and derive the container name of the key whose
/// certificate is stored under `tag`.
///
/// Every failure, from the transport or from the card data, is reported as a bad key.
pub fn resolve_container_name(
    transport: &dyn CardTransport,
    reader: &str,
    tag: [u8; 3],
) -> KspResult<String> {
    let resolve = || -> KspResult<String> {
        let context = transport
            .establish_context()
            .map_err(|e| KspError::BadKey(e.to_string()))?;
        let mut channel = context
            .connect(reader)
            .map_err(|e| KspError::BadKey(e.to_string()))?;

        exchange(channel.as_mut(), &APDU_PIV_SELECT_AID)?;
        let chuid = exchange(channel.as_mut(), &APDU_PIV_GET_CHUID)?;
        let guid = chuid_guid(&chuid)
            .ok_or_else(|| KspError::BadKey("no GUID in the CHUID data object".to_owned()))?;
        Ok(container_name(&guid, tag))
    };
    let name = resolve().inspect_err(|e| {
        warn!("PIV container name resolution failed on reader {reader}: {e}");
    })?;
    debug!("PIV container name on reader {reader}: {name}");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::{
        PIV_CONTAINER_NAME_LEN, PIV_NAME_PROPERTY_SIZE, check_status, chuid_guid, container_name,
        piv_tag_for_label,
    };

    #[test]
    fn labels_map_to_their_tags() {
        assert_eq!(
            piv_tag_for_label(b"Certificate for PIV Authentication"),
            Some([0x5F, 0xC1, 0x05])
        );
        assert_eq!(
            piv_tag_for_label(b"Certificate for Card Authentication\0"),
            Some([0x5F, 0xC1, 0x01])
        );
        assert_eq!(piv_tag_for_label(b"Certificate for PIV"), None);
        assert_eq!(piv_tag_for_label(b"certificate for key management"), None);
        assert_eq!(piv_tag_for_label(b""), None);
    }

    #[test]
    fn status_words() {
        assert_eq!(check_status(&[0x01, 0x90, 0x00]), Some(&[0x01_u8][..]));
        assert_eq!(check_status(&[0x61, 0x10]), Some(&[][..]));
        assert_eq!(check_status(&[0x6A, 0x82]), None);
        assert_eq!(check_status(&[0x90]), None);
    }

    #[test]
    fn container_name_reorders_the_guid() {
        let guid: [u8; 16] = core::array::from_fn(|i| i as u8);
        let name = container_name(&guid, [0x5F, 0xC1, 0x0A]);
        assert_eq!(name, "03020100-0504-0706-0809-0a0b0c5fc10a");
        assert_eq!(name.len(), PIV_CONTAINER_NAME_LEN);
        assert_eq!(PIV_NAME_PROPERTY_SIZE, 74);
    }

    #[test]
    fn guid_is_found_among_the_chuid_entries() {
        let mut inner = vec![0x30, 0x02, 0xAA, 0xBB, 0x34, 0x10];
        inner.extend(0_u8..16);
        inner.extend([0x35, 0x01, 0x00]);
        let mut chuid = vec![0x53, u8::try_from(inner.len()).unwrap()];
        chuid.extend(&inner);
        assert_eq!(chuid_guid(&chuid), Some(core::array::from_fn(|i| i as u8)));

        chuid[0] = 0x54;
        assert_eq!(chuid_guid(&chuid), None);

        // GUID of the wrong size
        let chuid = [0x53, 0x04, 0x34, 0x02, 0x01, 0x02];
        assert_eq!(chuid_guid(&chuid), None);
    }

    #[test]
    fn guid_is_found_in_a_truncated_signed_chuid() {
        let guid: [u8; 16] = core::array::from_fn(|i| 0xA0 + i as u8);
        let mut inner = vec![0x30, 0x19];
        inner.extend([0xD4; 0x19]);
        inner.extend([0x34, 0x10]);
        inner.extend(guid);
        inner.extend([0x35, 0x08]);
        inner.extend(b"20301231");
        inner.extend([0x3E, 0x82, 0x03, 0x00]);
        inner.extend([0x5C; 0x300]);
        inner.extend([0xFE, 0x00]);
        let len = u16::try_from(inner.len()).unwrap().to_be_bytes();
        let mut chuid = vec![0x53, 0x82, len[0], len[1]];
        chuid.extend(&inner);
        assert_eq!(chuid_guid(&chuid), Some(guid));

        // first response chunk only, the signature is cut
        chuid.truncate(256);
        assert_eq!(chuid_guid(&chuid), Some(guid));

        // cut before the GUID ends
        chuid.truncate(40);
        assert_eq!(chuid_guid(&chuid), None);
    }
}
