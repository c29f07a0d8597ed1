use std::path::{Path, PathBuf};

use pkcs11_sys::CK_SLOT_ID;
use tracing::{info, warn};

use crate::{
    config::ProviderConfig,
    error::{KspError, result::KspResult},
    key_name,
    token::{Pkcs11Library, TokenModule},
    transport::CardTransport,
};

/// A key storage provider bound to one loaded PKCS#11 module.
///
/// Dropping the provider finalizes the module and unloads it. Keys and enumeration states borrow
/// the provider, so they cannot outlive it.
pub struct Provider {
    module: Box<dyn TokenModule>,
    module_path: PathBuf,
    config: ProviderConfig,
    transport: Option<Box<dyn CardTransport>>,
}

#[cfg(feature = "pcsc")]
fn default_card_transport() -> Option<Box<dyn CardTransport>> {
    Some(Box::new(crate::transport::PcscTransport))
}

#[cfg(not(feature = "pcsc"))]
fn default_card_transport() -> Option<Box<dyn CardTransport>> {
    None
}

impl Provider {
    /// Open the first module of `config.module_paths` that loads and initializes.
    ///
    /// # Errors
    /// When every module fails, the error of the last attempt is returned.
    pub fn open(config: ProviderConfig) -> KspResult<Self> {
        config.validate()?;
        let mut last_error = None;
        let mut loaded = None;
        for path in &config.module_paths {
            match Pkcs11Library::load(path) {
                Ok(library) => {
                    loaded = Some((library, path.clone()));
                    break;
                }
                Err(e) => {
                    warn!("unable to use PKCS#11 module {}: {e}", path.display());
                    last_error = Some(e);
                }
            }
        }
        match loaded {
            Some((library, path)) => {
                info!("using PKCS#11 module {}", path.display());
                Ok(Self::with_module(Box::new(library), path, config))
            }
            None => Err(last_error.unwrap_or_else(|| {
                KspError::ProviderNotFound("no PKCS#11 module configured".to_owned())
            })),
        }
    }

    /// Build a provider over an already initialized token module.
    pub fn with_module<P: Into<PathBuf>>(
        module: Box<dyn TokenModule>,
        module_path: P,
        config: ProviderConfig,
    ) -> Self {
        Self {
            module,
            module_path: module_path.into(),
            config,
            transport: default_card_transport(),
        }
    }

    /// Replace the transport used to talk to PIV cards.
    #[must_use]
    pub fn with_card_transport(mut self, transport: Box<dyn CardTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn module(&self) -> &dyn TokenModule {
        self.module.as_ref()
    }

    #[must_use]
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn card_transport(&self) -> Option<&dyn CardTransport> {
        self.transport.as_deref()
    }

    /// Open the key designated by a name returned by an enumeration.
    pub fn open_key(&self, name: &str) -> KspResult<KeyHandle<'_>> {
        let (slot_id, key_id) = key_name::decode(name)?;
        Ok(KeyHandle {
            provider: self,
            slot_id,
            key_id,
        })
    }
}

/// A key of a [`Provider`], designated by its slot and the identifier shared by the key and its
/// certificate.
pub struct KeyHandle<'p> {
    pub(crate) provider: &'p Provider,
    pub(crate) slot_id: CK_SLOT_ID,
    pub(crate) key_id: Vec<u8>,
}

impl KeyHandle<'_> {
    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    #[must_use]
    pub fn key_id(&self) -> &[u8] {
        &self.key_id
    }

    #[must_use]
    pub fn key_name(&self) -> String {
        key_name::encode(self.slot_id, &self.key_id)
    }
}
