//! Smart card transport.
//!
//! A [`CardTransport`] establishes a [`CardContext`], which connects to a reader by name and
//! yields a [`CardChannel`] exchanging APDUs with the inserted card. Releasing the context and
//! disconnecting the card are tied to the drop of the corresponding values.

use thiserror::Error;

#[cfg(feature = "pcsc")]
mod pcsc_card;

#[cfg(feature = "pcsc")]
pub use pcsc_card::PcscTransport;

/// Capacity of the buffer receiving a card response: a short APDU response plus status bytes.
pub const RESPONSE_BUFFER_LEN: usize = 258;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("cannot establish the card context: {0}")]
    Context(String),

    #[error("cannot connect to reader {reader}: {reason}")]
    Connect { reader: String, reason: String },

    #[error("transmit failed: {0}")]
    Transmit(String),
}

pub trait CardTransport {
    fn establish_context(&self) -> Result<Box<dyn CardContext>, TransportError>;
}

pub trait CardContext {
    /// Connect to the card in `reader`, in shared mode, with T=0 or T=1.
    fn connect(&self, reader: &str) -> Result<Box<dyn CardChannel + '_>, TransportError>;
}

pub trait CardChannel {
    /// Send one command APDU and return the full response, status bytes included.
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;
}
