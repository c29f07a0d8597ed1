//! Tests against the PKCS#11 modules installed on the host.

use std::path::PathBuf;

use crate::{KspError, Provider, ProviderConfig, SecurityStatus, log_init};

#[test]
fn missing_modules_are_reported() {
    log_init("cosmian_pkcs11_ksp=debug");
    let config = ProviderConfig {
        module_paths: vec![
            PathBuf::from("/nonexistent/first-pkcs11.so"),
            PathBuf::from("/nonexistent/second-pkcs11.so"),
        ],
        ..ProviderConfig::default()
    };
    let err = Provider::open(config).err().unwrap();
    assert_eq!(err.status(), SecurityStatus::ProvDllNotFound);
    assert!(err.to_string().contains("second-pkcs11"), "{err}");
}

#[test]
fn empty_module_list_is_rejected() {
    let config = ProviderConfig {
        module_paths: Vec::new(),
        ..ProviderConfig::default()
    };
    let err = Provider::open(config).err().unwrap();
    assert_eq!(err.status(), SecurityStatus::InvalidParameter);
}

#[test]
#[ignore = "needs a PKCS#11 module and a token"]
fn enumerate_installed_tokens() {
    log_init("cosmian_pkcs11_ksp=debug");
    let config = ProviderConfig::load(None).unwrap();
    let provider = Provider::open(config).unwrap();

    let mut state = None;
    loop {
        match provider.enum_keys(None, &mut state) {
            Ok(key) => {
                let handle = provider.open_key(&key.name).unwrap();
                let certificate = handle.certificate().unwrap();
                assert!(!certificate.is_empty());
                println!("{} {} {}", key.name, key.algorithm, handle.reader().unwrap());
            }
            Err(KspError::NoMoreItems) => break,
            Err(e) => panic!("enumeration failed: {e}"),
        }
    }
}
