use std::{path::PathBuf, process};

use clap::{Parser, Subcommand};
use cosmian_pkcs11_ksp::{KeyHandle, KspError, KspResult, Provider, ProviderConfig, log_init};
use x509_parser::parse_x509_certificate;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file location
    ///
    /// Takes precedence over the `COSMIAN_KSP_CONF` env variable.
    #[arg(short, long)]
    conf: Option<PathBuf>,

    /// PKCS#11 module to load instead of the configured ones. May be repeated.
    #[arg(short, long, global = true)]
    module: Vec<PathBuf>,

    /// Log filter, e.g. `info` or `cosmian_pkcs11_ksp=debug`
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the keys of the tokens which have a certificate
    List {
        /// Only list the keys of this reader
        #[arg(short, long)]
        reader: Option<String>,
    },
    /// Show the properties of a key
    Show {
        /// Key name, as printed by `list`
        key_name: String,
    },
}

fn main() {
    if let Some(err) = main_().err() {
        eprintln!("ERROR: {err} ({})", err.status());
        process::exit(1);
    }
}

fn main_() -> KspResult<()> {
    let cli = Cli::parse();
    log_init(&cli.log_level);

    let mut config = ProviderConfig::load(cli.conf)?;
    if !cli.module.is_empty() {
        config.module_paths = cli.module;
    }
    let provider = Provider::open(config)?;
    match cli.command {
        Commands::List { reader } => list(&provider, reader.as_deref()),
        Commands::Show { key_name } => show(&provider.open_key(&key_name)?),
    }
}

fn list(provider: &Provider, reader: Option<&str>) -> KspResult<()> {
    let scope = reader.map(|reader| format!("\\\\.\\{reader}\\"));
    let mut state = None;
    loop {
        match provider.enum_keys(scope.as_deref(), &mut state) {
            Ok(key) => {
                println!("{} ({})", key.name, key.algorithm);
                show(&provider.open_key(&key.name)?)?;
                println!();
            }
            Err(KspError::NoMoreItems) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn show(key: &KeyHandle<'_>) -> KspResult<()> {
    println!("  key:      {}", key.key_name());
    println!("  reader:   {}", key.reader()?);
    println!("  slot id:  {}", key.slot_id_property()?);
    match key.name() {
        Ok(name) => println!("  name:     {name}"),
        Err(e) => println!("  name:     <{e}>"),
    }
    let der = key.certificate()?;
    let (_, certificate) = parse_x509_certificate(&der)
        .map_err(|e| KspError::BadData(format!("invalid certificate: {e}")))?;
    println!("  subject:  {}", certificate.subject());
    println!("  issuer:   {}", certificate.issuer());
    println!("  serial:   {}", certificate.raw_serial_as_string());
    println!(
        "  validity: {} to {}",
        certificate.validity().not_before,
        certificate.validity().not_after
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::Cli;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }
}
