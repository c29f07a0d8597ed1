use std::{
    env::{self, consts::DLL_SUFFIX},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{KspError, result::KspResult},
    ksp_ensure,
};

pub const KSP_CONF_ENV: &str = "COSMIAN_KSP_CONF";

/// Upper bound on the slots, keys, and keys per slot collected by one enumeration.
pub const DEFAULT_ENUMERATION_LIMIT: usize = 64;

fn default_module_paths() -> Vec<PathBuf> {
    ["p11-kit-proxy", "opensc-pkcs11"]
        .iter()
        .map(|name| PathBuf::from(format!("{name}{DLL_SUFFIX}")))
        .collect()
}

const fn default_limit() -> usize {
    DEFAULT_ENUMERATION_LIMIT
}

const fn default_rsa_only() -> bool {
    true
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct EnumerationLimits {
    #[serde(default = "default_limit")]
    pub max_slots: usize,
    #[serde(default = "default_limit")]
    pub max_keys: usize,
    #[serde(default = "default_limit")]
    pub max_keys_per_slot: usize,
}

impl Default for EnumerationLimits {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_ENUMERATION_LIMIT,
            max_keys: DEFAULT_ENUMERATION_LIMIT,
            max_keys_per_slot: DEFAULT_ENUMERATION_LIMIT,
        }
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// PKCS#11 modules tried in order; the first one that loads and initializes is used.
    #[serde(default = "default_module_paths")]
    pub module_paths: Vec<PathBuf>,

    #[serde(default)]
    pub limits: EnumerationLimits,

    /// Only enumerate RSA keys.
    #[serde(default = "default_rsa_only")]
    pub rsa_only: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            module_paths: default_module_paths(),
            limits: EnumerationLimits::default(),
            rsa_only: true,
        }
    }
}

impl ProviderConfig {
    /// Load the configuration.
    ///
    /// The file is `conf_path` when given, else the file named by `COSMIAN_KSP_CONF`. Without
    /// either, the defaults are returned.
    ///
    /// # Errors
    /// Return an error if the file cannot be read, is not valid TOML, or holds invalid limits.
    pub fn load(conf_path: Option<PathBuf>) -> KspResult<Self> {
        let conf_path = conf_path.or_else(|| env::var_os(KSP_CONF_ENV).map(PathBuf::from));
        match conf_path {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("no configuration file, using the defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> KspResult<Self> {
        debug!("Loading configuration from: {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            KspError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> KspResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KspResult<()> {
        let limits = &self.limits;
        ksp_ensure!(
            limits.max_slots > 0 && limits.max_keys > 0 && limits.max_keys_per_slot > 0,
            KspError::InvalidParameter("enumeration limits must be greater than zero".to_owned())
        );
        ksp_ensure!(
            !self.module_paths.is_empty(),
            KspError::InvalidParameter("at least one PKCS#11 module path is required".to_owned())
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{env::consts::DLL_SUFFIX, fs, path::PathBuf};

    use super::{DEFAULT_ENUMERATION_LIMIT, ProviderConfig};
    use crate::status::SecurityStatus;

    #[test]
    fn defaults() {
        let config = ProviderConfig::default();
        assert_eq!(
            config.module_paths,
            vec![
                PathBuf::from(format!("p11-kit-proxy{DLL_SUFFIX}")),
                PathBuf::from(format!("opensc-pkcs11{DLL_SUFFIX}")),
            ]
        );
        assert_eq!(config.limits.max_slots, DEFAULT_ENUMERATION_LIMIT);
        assert_eq!(config.limits.max_keys, 64);
        assert!(config.rsa_only);
        assert_eq!(ProviderConfig::from_toml("").unwrap(), config);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ksp.toml");
        fs::write(
            &path,
            r#"
module_paths = ["/usr/lib/softhsm/libsofthsm2.so"]
rsa_only = false

[limits]
max_keys = 8
"#,
        )
        .unwrap();

        let config = ProviderConfig::load(Some(path)).unwrap();
        assert_eq!(
            config.module_paths,
            vec![PathBuf::from("/usr/lib/softhsm/libsofthsm2.so")]
        );
        assert!(!config.rsa_only);
        assert_eq!(config.limits.max_keys, 8);
        assert_eq!(config.limits.max_slots, 64);
        assert_eq!(config.limits.max_keys_per_slot, 64);
    }

    #[test]
    fn invalid_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        let err = ProviderConfig::load(Some(missing)).unwrap_err();
        assert!(err.to_string().contains("cannot read"));

        let zero = dir.path().join("zero.toml");
        fs::write(&zero, "[limits]\nmax_slots = 0\n").unwrap();
        let err = ProviderConfig::from_file(&zero).unwrap_err();
        assert_eq!(err.status(), SecurityStatus::InvalidParameter);

        let unknown = dir.path().join("unknown.toml");
        fs::write(&unknown, "modules = []\n").unwrap();
        assert!(ProviderConfig::from_file(&unknown).is_err());

        assert!(ProviderConfig::from_toml("module_paths = []").is_err());
    }
}
