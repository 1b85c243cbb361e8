//! Invoice domain types: header, parties, normalized line items and the
//! candidate/signed document artifacts.
pub mod codes;
pub mod normalize;
pub mod raw;
pub mod sign;
pub mod validation;
pub mod xml;

pub use codes::{CodeTables, TaxRate};
pub use normalize::{
    normalize_customer, normalize_decimal, normalize_header, normalize_issuer, normalize_item,
    normalize_quantity, normalize_string, validate_decimal_format,
};
pub use raw::{RawRecord, RawValue};

use crate::config::EnvironmentType;
use crate::ruc::RucError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fractional digits for `dCantCodInt`.
pub const QUANTITY_PRECISION: u32 = 4;
/// Fractional digits for unit prices and per-unit discounts.
pub const UNIT_PRICE_PRECISION: u32 = 6;
/// Fractional digits for line and document amounts.
pub const AMOUNT_PRECISION: u32 = 2;
/// Fractional digits for the ITBMS percentage.
pub const TAX_RATE_PRECISION: u32 = 2;

/// Input shape errors raised before any XML is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("missing required field {field}")]
    MissingField { field: &'static str },
    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("{field} must have exactly {precision} fractional digits, got {value:?}")]
    Precision {
        field: &'static str,
        precision: u32,
        value: String,
    },
    #[error(transparent)]
    Ruc(#[from] RucError),
}

/// Document-level data for `gDGen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub document_type: String,
    pub number: u64,
    pub point_of_sale: String,
    pub issue_datetime: DateTime<FixedOffset>,
    pub security_code: String,
    pub emission_type: u8,
    pub environment: EnvironmentType,
    pub payment_method: String,
    pub destination: u8,
}

impl InvoiceHeader {
    pub fn new(
        document_type: impl Into<String>,
        number: u64,
        point_of_sale: impl Into<String>,
        issue_datetime: DateTime<FixedOffset>,
        environment: EnvironmentType,
    ) -> Self {
        Self {
            document_type: document_type.into(),
            number,
            point_of_sale: point_of_sale.into(),
            issue_datetime,
            security_code: default_security_code(number),
            emission_type: 1,
            environment,
            payment_method: "contado".to_string(),
            destination: 1,
        }
    }

    pub fn with_security_code(mut self, code: impl Into<String>) -> Self {
        self.security_code = code.into();
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = method.into();
        self
    }

    pub fn with_emission_type(mut self, emission_type: u8) -> Self {
        self.emission_type = emission_type;
        self
    }

    pub fn with_destination(mut self, destination: u8) -> Self {
        self.destination = destination;
        self
    }
}

pub(crate) fn default_security_code(number: u64) -> String {
    format!("{:09}", number % 1_000_000_000)
}

/// Emitting organization (`gEmis`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub ruc: String,
    pub check_digit: Option<String>,
    pub taxpayer_type: Option<u8>,
    pub legal_name: String,
    pub branch_code: String,
    pub coordinates: Option<String>,
    pub address: String,
    pub location_code: Option<String>,
    pub corregimiento_name: String,
    pub district_name: String,
    pub province_code: u8,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Receiver after normalization (`gDatRec`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedCustomer {
    pub client_type_code: u8,
    pub taxpayer_type_code: Option<u8>,
    pub tax_id: String,
    pub check_digit: Option<String>,
    pub legal_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub location_code: Option<String>,
    pub province_code: u8,
    pub district_name: String,
    pub corregimiento_name: String,
    pub country_code: String,
}

/// Line item whose numeric fields are already fixed-precision strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedInvoiceItem {
    pub description: String,
    pub code: Option<String>,
    pub unit: Option<String>,
    pub quantity: String,
    pub unit_price: String,
    /// Per-unit discount written to `dPrUnitDesc`.
    pub discounted_unit_price: String,
    pub item_total: String,
    pub freight_amount: String,
    pub insurance_amount: String,
    pub tax_rate: String,
}

impl NormalizedInvoiceItem {
    /// Check every decimal field against its precision.
    ///
    /// # Errors
    /// Returns [`FormatError::Precision`] for the first field that does not
    /// match `^\d+\.\d{N}$`, or [`FormatError::MissingField`] for an empty
    /// description.
    pub fn check_format(&self) -> Result<(), FormatError> {
        if self.description.trim().is_empty() {
            return Err(FormatError::MissingField {
                field: "description",
            });
        }
        let fields: [(&'static str, &str, u32); 7] = [
            ("quantity", self.quantity.as_str(), QUANTITY_PRECISION),
            ("unit_price", self.unit_price.as_str(), UNIT_PRICE_PRECISION),
            (
                "discounted_unit_price",
                self.discounted_unit_price.as_str(),
                UNIT_PRICE_PRECISION,
            ),
            ("item_total", self.item_total.as_str(), AMOUNT_PRECISION),
            ("freight_amount", self.freight_amount.as_str(), AMOUNT_PRECISION),
            ("insurance_amount", self.insurance_amount.as_str(), AMOUNT_PRECISION),
            ("tax_rate", self.tax_rate.as_str(), TAX_RATE_PRECISION),
        ];
        for (field, value, precision) in fields {
            if !validate_decimal_format(value, precision) {
                return Err(FormatError::Precision {
                    field,
                    precision,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A leaf the structural validator extracted from a candidate document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalField {
    pub name: String,
    pub value: String,
}

/// Unsigned XML plus what the validator extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDocument {
    xml: String,
    unique_code: String,
    critical_fields: Vec<CriticalField>,
}

impl CandidateDocument {
    pub fn new(xml: String, unique_code: String) -> Self {
        Self {
            xml,
            unique_code,
            critical_fields: Vec::new(),
        }
    }

    pub fn with_critical_fields(mut self, fields: Vec<CriticalField>) -> Self {
        self.critical_fields = fields;
        self
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Deterministic `dId` of the document.
    pub fn unique_code(&self) -> &str {
        &self.unique_code
    }

    pub fn critical_fields(&self) -> &[CriticalField] {
        &self.critical_fields
    }
}

/// Candidate XML with its enveloped signature. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    xml: String,
    digest: String,
    signature_value: String,
    certificate_fingerprint: String,
}

impl SignedDocument {
    pub(crate) fn new(
        xml: String,
        digest: String,
        signature_value: String,
        certificate_fingerprint: String,
    ) -> Self {
        Self {
            xml,
            digest,
            signature_value,
            certificate_fingerprint,
        }
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Base64 SHA-256 digest of the canonicalized document.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn certificate_fingerprint(&self) -> &str {
        &self.certificate_fingerprint
    }

    pub fn into_xml(self) -> String {
        self.xml
    }
}
