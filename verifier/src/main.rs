use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ebics::auth_signature::{self, SignatureCheck};
use ebics::xml::Document;
use ebics::RustCrypto;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::Serialize;

/// Recomputes the authentication digest of a stored EBICS request or
/// response and checks its SignatureValue.
#[derive(Parser, Debug)]
#[command(name = "ebics-verifier", version)]
struct Cli {
    /// EBICS document (XML).
    #[arg(required_unless_present = "markdown_help")]
    document: Option<PathBuf>,

    /// RSA public key of the signer, PKCS#1 or SPKI PEM.
    #[arg(long, short = 'k', required_unless_present = "markdown_help")]
    public_key: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    #[arg(long, hide = true)]
    markdown_help: bool,
}

#[derive(Serialize)]
struct Report {
    document: String,
    computed_digest: String,
    embedded_digest: String,
    digest_matches: bool,
    signature_valid: bool,
}

impl Report {
    fn new(document: String, check: &SignatureCheck) -> Self {
        Report {
            document,
            computed_digest: hex::encode(check.computed_digest),
            embedded_digest: hex::encode(&check.embedded_digest),
            digest_matches: check.digest_matches(),
            signature_valid: check.signature_valid,
        }
    }

    fn is_valid(&self) -> bool {
        self.digest_matches && self.signature_valid
    }
}

fn parse_public_key(text: &str) -> Result<RsaPublicKey> {
    let block = pem::parse(text).context("Public key is not PEM")?;
    match block.tag() {
        "RSA PUBLIC KEY" => Ok(RsaPublicKey::from_pkcs1_der(block.contents())?),
        "PUBLIC KEY" => Ok(RsaPublicKey::from_public_key_der(block.contents())?),
        other => bail!("unsupported PEM block `{}`", other),
    }
}

fn check(document: &Path, public_key: &Path) -> Result<Report> {
    let key_text =
        fs::read_to_string(public_key).with_context(|| format!("Failed to read {}", public_key.display()))?;
    let key = parse_public_key(&key_text)?;
    let bytes = fs::read(document).with_context(|| format!("Failed to read {}", document.display()))?;
    let parsed = Document::parse(&bytes).with_context(|| format!("{} is not well-formed XML", document.display()))?;
    log::debug!("checking {} ({})", document.display(), parsed.root.name);
    let result = auth_signature::check(&parsed.root, &key, &RustCrypto)?;
    Ok(Report::new(document.display().to_string(), &result))
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(ExitCode::SUCCESS);
    }
    let (Some(document), Some(public_key)) = (&cli.document, &cli.public_key) else {
        bail!("a document and a public key are required");
    };
    let report = check(document, public_key)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("document:        {}", report.document);
        println!("computed digest: {}", report.computed_digest);
        println!("embedded digest: {}", report.embedded_digest);
        println!("signature:       {}", if report.signature_valid { "valid" } else { "INVALID" });
    }
    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
