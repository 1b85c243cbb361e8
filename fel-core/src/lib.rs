//! Rust toolkit for Panama's electronic invoicing (FEL): normalization, `rFE`
//! XML generation, structural validation, enveloped signing, PKCS#12
//! certificates and the DGI certification service.
//!
//! # Examples
//! ```rust
//! use fel_core::config::{Config, EnvironmentType};
//!
//! let config = Config::new(EnvironmentType::Sandbox);
//! assert_eq!(config.env().ambient_code(), 2);
//! ```
pub mod api;
pub mod certificate;
pub mod classify;
pub mod config;
pub mod invoice;
pub mod pipeline;
pub mod ruc;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Ruc(#[from] ruc::RucError),
    #[error(transparent)]
    Format(#[from] invoice::FormatError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::InvoiceXmlError),
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Envelope(#[from] api::envelope::EnvelopeError),
    #[error(transparent)]
    Transport(#[from] api::TransportError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
}
