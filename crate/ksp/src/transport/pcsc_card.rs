use std::ffi::CString;

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode};
use tracing::{debug, warn};

use super::{CardChannel, CardContext, CardTransport, RESPONSE_BUFFER_LEN, TransportError};

/// Card transport over the system PC/SC service.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcscTransport;

impl CardTransport for PcscTransport {
    fn establish_context(&self) -> Result<Box<dyn CardContext>, TransportError> {
        let context = Context::establish(Scope::User)
            .map_err(|e| TransportError::Context(e.to_string()))?;
        Ok(Box::new(PcscContext { context }))
    }
}

struct PcscContext {
    context: Context,
}

impl CardContext for PcscContext {
    fn connect(&self, reader: &str) -> Result<Box<dyn CardChannel + '_>, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            reader: reader.to_owned(),
            reason,
        };
        let reader_name = CString::new(reader).map_err(|e| connect_error(e.to_string()))?;
        let card = self
            .context
            .connect(&reader_name, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("connected to the card in {reader}");
        Ok(Box::new(PcscChannel { card: Some(card) }))
    }
}

struct PcscChannel {
    card: Option<Card>,
}

impl CardChannel for PcscChannel {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| TransportError::Transmit("card disconnected".to_owned()))?;
        let mut response = [0_u8; RESPONSE_BUFFER_LEN];
        let response = card
            .transmit(apdu, &mut response)
            .map_err(|e| TransportError::Transmit(e.to_string()))?;
        Ok(response.to_vec())
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
                warn!("SCardDisconnect failed: {e}");
            }
        }
    }
}
