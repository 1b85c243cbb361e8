use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fel_core::api::{AuthorityClient, AuthorityCredentials, AuthorityResponse};
use fel_core::certificate::Certificate;
use fel_core::classify::{ClassifiedResponse, ResponseClassifier};
use fel_core::config::Config;
use fel_core::invoice::sign::DocumentSigner;
use fel_core::invoice::validation::{StructuralValidator, generate_report};
use fel_core::invoice::xml::XmlGenerator;
use fel_core::invoice::{normalize_customer, normalize_header, normalize_issuer, normalize_item};
use fel_core::pipeline::{CertificationPipeline, RawInvoice};
use fel_core::ruc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fel")]
#[command(about = "Panama FEL document certification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CertArgs {
    /// PKCS#12 bundle holding the signing key and certificate.
    #[arg(long)]
    cert: PathBuf,
    #[arg(long, env = "FEL_CERT_PASSPHRASE", hide_env_values = true)]
    passphrase: String,
}

impl CertArgs {
    fn load(&self) -> Result<Certificate> {
        Certificate::load(&self.cert, self.passphrase.clone().into())
            .with_context(|| format!("loading certificate {}", self.cert.display()))
    }
}

#[derive(Args)]
struct AuthorityArgs {
    #[arg(long, env = "FEL_AUTHORITY_USER")]
    username: String,
    #[arg(long, env = "FEL_AUTHORITY_PASSWORD", hide_env_values = true)]
    password: String,
}

impl AuthorityArgs {
    fn credentials(&self) -> AuthorityCredentials {
        AuthorityCredentials::new(self.username.clone(), self.password.clone().into())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a RUC check digit, or check a RUC that already carries one.
    Ruc {
        ruc: String,
        #[arg(long)]
        check: bool,
    },
    CertInfo {
        #[command(flatten)]
        cert: CertArgs,
        /// Also check the certificate against this issuer RUC.
        #[arg(long)]
        expected_ruc: Option<String>,
    },
    /// Normalize a raw JSON document and print the unsigned rFE XML.
    Generate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Validate {
        #[arg(long)]
        invoice: PathBuf,
    },
    Sign {
        #[arg(long)]
        invoice: PathBuf,
        #[command(flatten)]
        cert: CertArgs,
        #[arg(long)]
        signed_invoice: Option<PathBuf>,
    },
    Verify {
        #[arg(long)]
        invoice: PathBuf,
        #[command(flatten)]
        cert: CertArgs,
    },
    /// Prepare a raw JSON document and submit it for certification.
    Submit {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        cert: CertArgs,
        #[command(flatten)]
        authority: AuthorityArgs,
        /// Write the signed XML here before submitting.
        #[arg(long)]
        signed_invoice: Option<PathBuf>,
    },
    Query {
        #[arg(long)]
        code: String,
        #[command(flatten)]
        authority: AuthorityArgs,
    },
    Cancel {
        #[arg(long)]
        code: String,
        #[arg(long)]
        reason: String,
        #[command(flatten)]
        authority: AuthorityArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("reading FEL_* configuration")?;
    tracing::debug!(environment = config.env().as_str(), "configuration loaded");

    match cli.command {
        Commands::Ruc { ruc, check } => {
            if check {
                if !ruc::is_valid_full_ruc(&ruc) {
                    bail!("INVALID: {ruc}");
                }
                println!("VALID");
            } else {
                println!("{}", ruc::compute_check_digit(&ruc)?);
            }
        }
        Commands::CertInfo { cert, expected_ruc } => {
            let certificate = cert.load()?;
            let status = certificate.expiry_status(config.expiry_warning_days());
            let mut info = serde_json::json!({
                "subject": certificate.subject(),
                "commonName": certificate.common_name(),
                "issuer": certificate.issuer(),
                "serialNumber": certificate.serial_number(),
                "taxId": certificate.tax_id(),
                "notBefore": certificate.not_before().to_rfc3339(),
                "notAfter": certificate.not_after().to_rfc3339(),
                "fingerprint": certificate.fingerprint(),
                "daysRemaining": status.days_remaining,
                "expired": status.expired,
                "expiringSoon": status.expiring_soon,
            });
            let validation = certificate.validate(expected_ruc.as_deref());
            info["valid"] = validation.valid.into();
            info["errors"] = validation.errors.into();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Generate { input, output } => {
            let raw = read_raw_invoice(&input)?;
            let header = normalize_header(&raw.header, config.env())?;
            let issuer = normalize_issuer(&raw.issuer)?;
            let customer = normalize_customer(&raw.customer)?;
            let items: Vec<_> = raw.items.iter().map(normalize_item).collect();
            if items.is_empty() {
                bail!("{} has no line items", input.display());
            }
            let candidate =
                XmlGenerator::new().generate_candidate(&header, &issuer, &customer, &items)?;
            eprintln!("unique code: {}", candidate.unique_code());
            write_or_print(output.as_deref(), candidate.xml())?;
        }
        Commands::Validate { invoice } => {
            let xml = read_text(&invoice)?;
            let report = StructuralValidator::new().validate(&xml);
            print!("{}", generate_report(&report));
            if !report.is_valid {
                bail!("{} failed structural validation", invoice.display());
            }
        }
        Commands::Sign {
            invoice,
            cert,
            signed_invoice,
        } => {
            let certificate = cert.load()?;
            let xml = read_text(&invoice)?;
            let signed = DocumentSigner::new().sign(&xml, &certificate)?;
            write_or_print(signed_invoice.as_deref(), signed.xml())?;
        }
        Commands::Verify { invoice, cert } => {
            let certificate = cert.load()?;
            let xml = read_text(&invoice)?;
            if !DocumentSigner::new().verify(&xml, &certificate) {
                bail!("signature of {} does not verify", invoice.display());
            }
            println!("OK");
        }
        Commands::Submit {
            input,
            cert,
            authority,
            signed_invoice,
        } => {
            let certificate = cert.load()?;
            let raw = read_raw_invoice(&input)?;
            let pipeline = CertificationPipeline::new(config.clone(), &certificate);
            let prepared = pipeline.prepare(&raw)?;
            if let Some(path) = signed_invoice.as_deref() {
                write_or_print(Some(path), prepared.signed().xml())?;
            }
            eprintln!("unique code: {}", prepared.unique_code());

            let client = AuthorityClient::new(config)?;
            let classified = pipeline
                .submit(&client, prepared.signed(), &authority.credentials())
                .await?;
            print_classified(&classified)?;
        }
        Commands::Query { code, authority } => {
            let client = AuthorityClient::new(config)?;
            let response = client.query(&code, &authority.credentials()).await?;
            print_classified(&classify(&response))?;
        }
        Commands::Cancel {
            code,
            reason,
            authority,
        } => {
            let client = AuthorityClient::new(config)?;
            let response = client
                .cancel(&code, &reason, &authority.credentials())
                .await?;
            print_classified(&classify(&response))?;
        }
    }

    Ok(())
}

fn classify(response: &AuthorityResponse) -> ClassifiedResponse {
    ResponseClassifier::default().classify(
        response.code(),
        response.message(),
        response.artifacts(),
    )
}

fn print_classified(classified: &ClassifiedResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(classified)?);
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_raw_invoice(path: &Path) -> Result<RawInvoice> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn write_or_print(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}
