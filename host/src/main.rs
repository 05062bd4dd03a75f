//! `ebics-host`: command line EBICS client.
//!
//! Typical onboarding: `keygen`, `ini`, `hia`, send the printed letter to
//! the bank, then `hpb` once the bank has activated the user. After that
//! `download` and `upload` work with any order type of the protocol version.

mod config;
mod http;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use ebics::{
    DateRange, EbicsClient, FileFormat, JsonFileKeyring, KeySlot, Keyring, KeyringStore, MessageName, Order,
    OrderParams, OrderType, ReceiptCode, RustCrypto, Service,
};

use crate::config::HostConfig;
use crate::http::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "ebics-host", version, about = "EBICS client: key management, downloads and uploads")]
struct Cli {
    /// JSON client configuration.
    #[arg(long, short = 'c', env = "EBICS_CONFIG", default_value = "client.json")]
    config: PathBuf,

    /// Password of the private keys in the keyring file.
    #[arg(long, env = "EBICS_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Print the command reference as markdown and exit.
    #[arg(long, hide = true)]
    markdown_help: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the user's A, X and E keys and print the INI letter hashes.
    Keygen {
        #[arg(long, default_value_t = 2048)]
        bits: usize,
        /// A005 or A006; defaults to what the protocol version prefers.
        #[arg(long)]
        signature_version: Option<String>,
        /// Replace an existing keyring file.
        #[arg(long)]
        force: bool,
    },
    /// Print the hashes of the user's public keys for the INI letter.
    Letter,
    /// Ask the bank which protocol versions it supports.
    Hev,
    /// Send the signature key.
    Ini,
    /// Send the authentication and encryption keys.
    Hia,
    /// Fetch the bank keys and store them in the keyring.
    Hpb,
    /// Download order data.
    Download(DownloadArgs),
    /// Upload order data from a file.
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Order type, e.g. STA, C53, FDL, BTD.
    order_type: OrderType,
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
    #[command(flatten)]
    params: ParamArgs,
    /// Acknowledge the download negatively; the bank keeps the data.
    #[arg(long)]
    negative_receipt: bool,
    /// Write the order data here instead of stdout.
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,
    /// Unpack a ZIP container into this directory.
    #[arg(long)]
    unzip: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Order type, e.g. CCT, XE2, FUL, BTU.
    order_type: OrderType,
    file: PathBuf,
    #[command(flatten)]
    params: ParamArgs,
    /// Send without electronic signature (3.0 only).
    #[arg(long)]
    unsigned: bool,
}

/// Order parameters of FDL/FUL and BTD/BTU.
#[derive(Args, Debug, Default)]
struct ParamArgs {
    /// FDL/FUL file format, e.g. pain.001.001.03.
    #[arg(long, conflicts_with = "service")]
    file_format: Option<String>,
    /// Country code of the file format; defaults to the bank's.
    #[arg(long, requires = "file_format")]
    country_code: Option<String>,
    /// BTD/BTU service name, e.g. EOP or SCT.
    #[arg(long, requires = "msg_name")]
    service: Option<String>,
    #[arg(long)]
    msg_name: Option<String>,
    #[arg(long)]
    msg_version: Option<String>,
    #[arg(long)]
    scope: Option<String>,
    #[arg(long)]
    service_option: Option<String>,
    /// Container type, e.g. ZIP.
    #[arg(long)]
    container: Option<String>,
}

impl ParamArgs {
    fn order_params(&self, bank_country: &str) -> OrderParams {
        if let Some(format) = &self.file_format {
            return OrderParams::FileFormat(FileFormat {
                format: format.clone(),
                country_code: self.country_code.clone().unwrap_or_else(|| bank_country.to_string()),
            });
        }
        let (Some(name), Some(msg_name)) = (&self.service, &self.msg_name) else {
            return OrderParams::None;
        };
        let mut message = MessageName::new(msg_name.clone());
        if let Some(version) = &self.msg_version {
            message = message.version(version.clone());
        }
        let mut service = Service::new(name.clone(), message);
        if let Some(scope) = &self.scope {
            service = service.scope(scope.clone());
        }
        if let Some(option) = &self.service_option {
            service = service.option(option.clone());
        }
        if let Some(container) = &self.container {
            service = service.container(container.clone());
        }
        OrderParams::Service(service)
    }
}

fn keyring_store(config: &HostConfig, password: &str) -> JsonFileKeyring {
    JsonFileKeyring::new(&config.keyring, password)
}

fn connect(config: &HostConfig, keyring: Keyring) -> Result<EbicsClient<HttpTransport>> {
    let transport = HttpTransport::new(config.timeout())?;
    Ok(
        EbicsClient::new(config.bank.clone(), config.user.clone(), keyring, transport)
            .with_config(config.client.clone()),
    )
}

fn print_letter(keyring: &Keyring) {
    for slot in [KeySlot::UserSignature, KeySlot::UserAuthentication, KeySlot::UserEncryption] {
        if let Some(entry) = keyring.get(slot) {
            println!("{} ({}): {}", slot, entry.version, entry.letter_hash(&RustCrypto));
        }
    }
}

fn write_output(data: &[u8], out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => fs::write(path, data).with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn download(config: &HostConfig, keyring: Keyring, args: DownloadArgs) -> Result<()> {
    let client = connect(config, keyring)?;
    let mut order = Order::new(args.order_type).with_params(args.params.order_params(&config.bank.country_code));
    if let (Some(start), Some(end)) = (args.start, args.end) {
        order = order.with_range(DateRange::new(start, end));
    }
    let code = if args.negative_receipt {
        ReceiptCode::Negative
    } else {
        ReceiptCode::Positive
    };
    let download = client.download_with(&order, |_| code)?;
    log::info!(
        "{} transaction {}: {} bytes",
        download.order_type,
        download.transaction_id,
        download.data.len()
    );
    match args.unzip {
        Some(dir) if download.is_zip() => {
            fs::create_dir_all(&dir)?;
            for entry in download.unzip()? {
                // keep entries inside the target directory
                let Some(name) = Path::new(&entry.name).file_name() else {
                    continue;
                };
                let path = dir.join(name);
                fs::write(&path, &entry.content).with_context(|| format!("Failed to write {}", path.display()))?;
                println!("{}", path.display());
            }
            Ok(())
        }
        Some(_) => bail!("{} order data is not a ZIP container", download.order_type),
        None => write_output(&download.data, args.out.as_deref()),
    }
}

fn upload(config: &HostConfig, keyring: Keyring, args: UploadArgs) -> Result<()> {
    let data = fs::read(&args.file).with_context(|| format!("Failed to read {}", args.file.display()))?;
    let client = connect(config, keyring)?;
    let mut order = Order::new(args.order_type).with_params(args.params.order_params(&config.bank.country_code));
    if args.unsigned {
        order = order.unsigned();
    }
    let upload = client.upload(&order, &data)?;
    println!(
        "{} transaction {} order {}",
        upload.order_type,
        upload.transaction_id,
        upload.order_id.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        bail!("no command given, see --help");
    };
    let config = HostConfig::load(&cli.config)?;
    let store = keyring_store(&config, &cli.password);
    match command {
        Command::Keygen {
            bits,
            signature_version,
            force,
        } => {
            if store.exists() && !force {
                bail!("{} exists, use --force to replace it", store.path().display());
            }
            let descriptor = config.bank.version.descriptor();
            let version = signature_version.unwrap_or_else(|| descriptor.signature_version.to_string());
            let mut keyring = Keyring::new();
            keyring.generate_user_keys(&RustCrypto, bits, &version)?;
            store.save(&keyring)?;
            if descriptor.certificates_required {
                log::warn!(
                    "{} key orders need X.509 certificates; add them to the keyring before INI/HIA",
                    config.bank.version
                );
            }
            print_letter(&keyring);
        }
        Command::Letter => print_letter(&store.load()?),
        Command::Hev => {
            let client = connect(&config, Keyring::new())?;
            for (protocol, release) in client.hev()?.versions {
                println!("{} {}", protocol, release);
            }
        }
        Command::Ini => {
            connect(&config, store.load()?)?.ini()?;
        }
        Command::Hia => {
            connect(&config, store.load()?)?.hia()?;
        }
        Command::Hpb => {
            let mut client = connect(&config, store.load()?)?;
            let keys = client.hpb()?;
            store.save(client.keyring())?;
            for entry in [&keys.authentication, &keys.encryption] {
                println!("bank {} ({}): {}", entry.usage.letter(), entry.version, entry.letter_hash(&RustCrypto));
            }
        }
        Command::Download(args) => download(&config, store.load()?, args)?,
        Command::Upload(args) => upload(&config, store.load()?, args)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }
    let result = run(cli);
    if let Err(error) = &result {
        if let Some(bank_error) = error.downcast_ref::<ebics::Error>().and_then(|e| e.bank_error()) {
            if let Some(response) = &bank_error.response {
                log::debug!("bank response:\n{}", String::from_utf8_lossy(response));
            }
        }
    }
    result
}
