//! End-to-end certification of one document.
//!
//! `prepare` is synchronous and pure apart from the certificate unlock:
//! normalize, generate, validate, sign. The network stages run afterwards, so
//! the private key is never held across an `.await`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{AuthorityClient, AuthorityCredentials, AuthorityResponse, TransportError};
use crate::api::envelope::EnvelopeCodec;
use crate::certificate::{Certificate, CertificateError};
use crate::classify::{ClassifiedResponse, ResponseCatalog, ResponseClassifier};
use crate::config::Config;
use crate::invoice::sign::{DocumentSigner, SigningError};
use crate::invoice::validation::{StructuralValidator, ValidationReport};
use crate::invoice::xml::{InvoiceXmlError, XmlGenerator};
use crate::invoice::{
    CandidateDocument, CodeTables, FormatError, RawRecord, SignedDocument, normalize_customer,
    normalize_header, normalize_issuer, normalize_item,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Xml(#[from] InvoiceXmlError),
    #[error("document failed structural validation with {} error(s)", .0.errors.len())]
    Validation(ValidationReport),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Raw records for one document, as read from upstream storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInvoice {
    pub header: RawRecord,
    pub issuer: RawRecord,
    pub customer: RawRecord,
    #[serde(default)]
    pub items: Vec<RawRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Refuse to sign when the structural validator reports errors.
    pub block_on_validation_errors: bool,
    /// Require the certificate subject RUC to equal the issuer RUC.
    pub require_tax_id_match: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            block_on_validation_errors: true,
            require_tax_id_match: true,
        }
    }
}

/// Output of [`CertificationPipeline::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    candidate: CandidateDocument,
    report: ValidationReport,
    signed: SignedDocument,
}

impl PreparedDocument {
    pub fn candidate(&self) -> &CandidateDocument {
        &self.candidate
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn signed(&self) -> &SignedDocument {
        &self.signed
    }

    /// Unique code to use for `query` after a timed-out submission.
    pub fn unique_code(&self) -> &str {
        self.candidate.unique_code()
    }

    pub fn into_signed(self) -> SignedDocument {
        self.signed
    }
}

/// Wires the stages together over shared, read-only collaborators.
///
/// # Examples
/// ```rust,no_run
/// use fel_core::certificate::Certificate;
/// use fel_core::config::Config;
/// use fel_core::pipeline::{CertificationPipeline, RawInvoice};
///
/// let cert = Certificate::load("firma.p12", "secret".into()).unwrap();
/// let raw: RawInvoice = serde_json::from_str(&std::fs::read_to_string("factura.json").unwrap()).unwrap();
/// let prepared = CertificationPipeline::new(Config::default(), &cert).prepare(&raw).unwrap();
/// println!("{}", prepared.unique_code());
/// ```
#[derive(Debug, Clone)]
pub struct CertificationPipeline<'a> {
    config: Config,
    certificate: &'a Certificate,
    generator: XmlGenerator<'a>,
    validator: StructuralValidator,
    signer: DocumentSigner,
    classifier: ResponseClassifier<'a>,
    options: PipelineOptions,
}

impl<'a> CertificationPipeline<'a> {
    pub fn new(config: Config, certificate: &'a Certificate) -> Self {
        Self {
            config,
            certificate,
            generator: XmlGenerator::with_tables(CodeTables::standard()),
            validator: StructuralValidator::new(),
            signer: DocumentSigner::new(),
            classifier: ResponseClassifier::new(ResponseCatalog::standard()),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_generator(mut self, generator: XmlGenerator<'a>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_validator(mut self, validator: StructuralValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_catalog(mut self, catalog: &'a ResponseCatalog) -> Self {
        self.classifier = ResponseClassifier::new(catalog);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn prepare(&self, raw: &RawInvoice) -> Result<PreparedDocument, PipelineError> {
        self.prepare_at(raw, Utc::now())
    }

    /// Normalize, generate, validate and sign `raw` as of `now`.
    ///
    /// # Errors
    /// Certificate problems are reported before any other stage runs.
    pub fn prepare_at(
        &self,
        raw: &RawInvoice,
        now: DateTime<Utc>,
    ) -> Result<PreparedDocument, PipelineError> {
        self.certificate.check_validity_at(now)?;
        let status = self
            .certificate
            .expiry_status_at(self.config.expiry_warning_days(), now);
        tracing::debug!(days_remaining = status.days_remaining, "certificate usable");

        let header = normalize_header(&raw.header, self.config.env())?;
        let issuer = normalize_issuer(&raw.issuer)?;
        if self.options.require_tax_id_match {
            self.certificate.check_tax_id(&issuer.ruc)?;
        }
        let customer = normalize_customer(&raw.customer)?;
        let items: Vec<_> = raw.items.iter().map(normalize_item).collect();
        if items.is_empty() {
            return Err(FormatError::MissingField { field: "items" }.into());
        }

        let candidate = self
            .generator
            .generate_candidate(&header, &issuer, &customer, &items)?;
        let report = self.validator.validate(candidate.xml());
        let candidate = candidate.with_critical_fields(report.critical_fields.clone());
        if !report.is_valid && self.options.block_on_validation_errors {
            return Err(PipelineError::Validation(report));
        }

        let signed = self.signer.sign_at(candidate.xml(), self.certificate, now)?;
        tracing::info!(unique_code = candidate.unique_code(), "document prepared");
        Ok(PreparedDocument {
            candidate,
            report,
            signed,
        })
    }

    pub async fn submit<C: EnvelopeCodec>(
        &self,
        client: &AuthorityClient<C>,
        document: &SignedDocument,
        credentials: &AuthorityCredentials,
    ) -> Result<ClassifiedResponse, PipelineError> {
        let response = client.submit(document, credentials).await?;
        Ok(self.classify(&response))
    }

    pub async fn query<C: EnvelopeCodec>(
        &self,
        client: &AuthorityClient<C>,
        unique_code: &str,
        credentials: &AuthorityCredentials,
    ) -> Result<ClassifiedResponse, PipelineError> {
        let response = client.query(unique_code, credentials).await?;
        Ok(self.classify(&response))
    }

    pub async fn cancel<C: EnvelopeCodec>(
        &self,
        client: &AuthorityClient<C>,
        unique_code: &str,
        reason: &str,
        credentials: &AuthorityCredentials,
    ) -> Result<ClassifiedResponse, PipelineError> {
        let response = client.cancel(unique_code, reason, credentials).await?;
        Ok(self.classify(&response))
    }

    pub fn classify(&self, response: &AuthorityResponse) -> ClassifiedResponse {
        self.classifier
            .classify(response.code(), response.message(), response.artifacts())
    }
}
