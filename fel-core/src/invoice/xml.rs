//! `rFE` document generation.
//!
//! The generator is deterministic: identical normalized inputs always produce
//! byte-identical XML, because the signature is computed over these bytes.
use super::codes::CodeTables;
use super::normalize::{fixed, to_decimal};
use super::{
    AMOUNT_PRECISION, CandidateDocument, FormatError, InvoiceHeader, Issuer, NormalizedCustomer,
    NormalizedInvoiceItem,
};
use crate::ruc;

use constants::{FEL_NS, FORM_VERSION, GENERIC_LOCATION_CODE, ROOT_TAG};
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;

/// XML generation error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
    #[error("line item {index} is malformed: {source}")]
    Item {
        index: usize,
        #[source]
        source: FormatError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Builds `rFE` documents from normalized data.
///
/// # Examples
/// ```rust
/// use chrono::DateTime;
/// use fel_core::config::EnvironmentType;
/// use fel_core::invoice::{normalize_customer, normalize_issuer, normalize_item, InvoiceHeader, RawRecord};
/// use fel_core::invoice::xml::XmlGenerator;
///
/// let header = InvoiceHeader::new(
///     "factura",
///     1,
///     "001",
///     DateTime::parse_from_rfc3339("2025-03-01T10:00:00-05:00").unwrap(),
///     EnvironmentType::Sandbox,
/// );
/// let issuer = normalize_issuer(&RawRecord::new().with("ruc", "155596713-2-2015").with("razon_social", "EMPRESA DEMO S.A."))?;
/// let customer = normalize_customer(&RawRecord::new().with("numero_ruc", "8-442-445"))?;
/// let items = vec![normalize_item(&RawRecord::new().with("precio_unitario", 10.0))];
///
/// let xml = XmlGenerator::new().generate(&header, &issuer, &customer, &items)?;
/// assert!(xml.contains("<dTotNeto>10.00</dTotNeto>"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct XmlGenerator<'a> {
    tables: &'a CodeTables,
    format: XmlFormat,
}

impl XmlGenerator<'static> {
    pub fn new() -> Self {
        Self::with_tables(CodeTables::standard())
    }
}

impl Default for XmlGenerator<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> XmlGenerator<'a> {
    pub fn with_tables(tables: &'a CodeTables) -> Self {
        Self {
            tables,
            format: XmlFormat::Compact,
        }
    }

    pub fn with_format(mut self, format: XmlFormat) -> Self {
        self.format = format;
        self
    }

    /// Generate the unsigned document.
    ///
    /// # Errors
    /// Returns [`InvoiceXmlError::Item`] when a line item violates its format
    /// invariant, or [`InvoiceXmlError::Serialize`] if serialization fails.
    pub fn generate(
        &self,
        header: &InvoiceHeader,
        issuer: &Issuer,
        customer: &NormalizedCustomer,
        items: &[NormalizedInvoiceItem],
    ) -> Result<String, InvoiceXmlError> {
        self.generate_candidate(header, issuer, customer, items)
            .map(|candidate| candidate.xml().to_string())
    }

    /// Generate the unsigned document together with its unique code.
    ///
    /// # Errors
    /// Same as [`XmlGenerator::generate`].
    pub fn generate_candidate(
        &self,
        header: &InvoiceHeader,
        issuer: &Issuer,
        customer: &NormalizedCustomer,
        items: &[NormalizedInvoiceItem],
    ) -> Result<CandidateDocument, InvoiceXmlError> {
        for (index, item) in items.iter().enumerate() {
            item.check_format()
                .map_err(|source| InvoiceXmlError::Item { index, source })?;
        }

        let document_type = self.tables.document_type_code(&header.document_type);
        let issuer_ruc = PartyRuc::for_issuer(issuer);
        let unique_code = unique_document_code(header, document_type, &issuer_ruc, issuer);
        let totals = DocumentTotals::compute(items, self.tables);

        let document = DocumentXml {
            header,
            issuer,
            issuer_ruc: &issuer_ruc,
            customer,
            items,
            totals: &totals,
            tables: self.tables,
            document_type,
            unique_code: &unique_code,
        };

        let mut buffer = String::new();
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');
        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = self.format
            {
                serializer.indent(indent_char, indent_size);
            }
            document.serialize(serializer)?;
        }

        tracing::debug!(unique_code = %unique_code, items = items.len(), "generated rFE document");
        Ok(CandidateDocument::new(buffer, unique_code))
    }
}

/// Unique document code (`dId`/CUFE) for a header and issuer.
///
/// Layout: `FE`, document type, taxpayer type, RUC left-padded to 20, check
/// digit padded to 2, branch, issue date `YYYYMMDD`, number padded to 10, point
/// of sale padded to 3, emission type padded to 2, environment, security code
/// padded to 9, then a Luhn digit over all preceding digits.
pub fn unique_code_for(header: &InvoiceHeader, issuer: &Issuer, tables: &CodeTables) -> String {
    let document_type = tables.document_type_code(&header.document_type);
    unique_document_code(header, document_type, &PartyRuc::for_issuer(issuer), issuer)
}

fn unique_document_code(
    header: &InvoiceHeader,
    document_type: &str,
    ruc: &PartyRuc,
    issuer: &Issuer,
) -> String {
    let mut code = format!(
        "FE{document_type}{}{:0>20}{:0>2}{:0>4}{}{:010}{:0>3}{:02}{}{:0>9}",
        ruc.taxpayer_type,
        ruc.ruc,
        ruc.check_digit.as_deref().unwrap_or("0"),
        issuer.branch_code,
        header.issue_datetime.format("%Y%m%d"),
        header.number,
        header.point_of_sale,
        header.emission_type,
        header.environment.ambient_code(),
        header.security_code,
    );
    let digits: Vec<u32> = code.chars().filter_map(|ch| ch.to_digit(10)).collect();
    code.push_str(&luhn_check_digit(&digits).to_string());
    code
}

fn luhn_check_digit(digits: &[u32]) -> u32 {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(position, digit)| {
            if position % 2 == 0 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                *digit
            }
        })
        .sum();
    (10 - sum % 10) % 10
}

struct PartyRuc {
    taxpayer_type: u8,
    ruc: String,
    check_digit: Option<String>,
}

impl PartyRuc {
    fn for_issuer(issuer: &Issuer) -> Self {
        Self::resolve(&issuer.ruc, issuer.taxpayer_type, issuer.check_digit.as_deref())
    }

    fn for_customer(customer: &NormalizedCustomer) -> Self {
        Self::resolve(
            &customer.tax_id,
            customer.taxpayer_type_code,
            customer.check_digit.as_deref(),
        )
    }

    // A missing check digit is derived from the RUC when the RUC is numeric.
    fn resolve(ruc_value: &str, taxpayer_type: Option<u8>, check_digit: Option<&str>) -> Self {
        let check_digit = match check_digit {
            Some(dv) => Some(dv.to_string()),
            None => ruc::compute_check_digit(ruc_value).ok(),
        };
        Self {
            taxpayer_type: taxpayer_type.unwrap_or_else(|| ruc::taxpayer_type(ruc_value)),
            ruc: ruc_value.to_string(),
            check_digit,
        }
    }
}

struct ItemAmounts {
    rate_code: &'static str,
    tax: Decimal,
    line_total: Decimal,
}

struct DocumentTotals {
    items: Vec<ItemAmounts>,
    net: Decimal,
    tax: Decimal,
    discount: Decimal,
    total: Decimal,
}

impl DocumentTotals {
    fn compute(items: &[NormalizedInvoiceItem], tables: &CodeTables) -> Self {
        let hundred = Decimal::ONE_HUNDRED;
        let mut totals = DocumentTotals {
            items: Vec::with_capacity(items.len()),
            net: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
        };
        for item in items {
            let item_total = to_decimal(&item.item_total);
            let rate = tables.resolve_tax_rate(&item.tax_rate);
            let tax = round_amount(item_total * rate.percent / hundred);
            let line_total = item_total
                + to_decimal(&item.freight_amount)
                + to_decimal(&item.insurance_amount)
                + tax;
            totals.net += item_total;
            totals.tax += tax;
            totals.discount +=
                round_amount(to_decimal(&item.discounted_unit_price) * to_decimal(&item.quantity));
            totals.total += line_total;
            totals.items.push(ItemAmounts {
                rate_code: rate.code,
                tax,
                line_total,
            });
        }
        totals
    }
}

fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(
        AMOUNT_PRECISION,
        rust_decimal::RoundingStrategy::MidpointAwayFromZero,
    )
}

fn amount(value: Decimal) -> String {
    fixed(value, AMOUNT_PRECISION)
}

struct DocumentXml<'a> {
    header: &'a InvoiceHeader,
    issuer: &'a Issuer,
    issuer_ruc: &'a PartyRuc,
    customer: &'a NormalizedCustomer,
    items: &'a [NormalizedInvoiceItem],
    totals: &'a DocumentTotals,
    tables: &'a CodeTables,
    document_type: &'a str,
    unique_code: &'a str,
}

impl<'a> Serialize for DocumentXml<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct(ROOT_TAG, 0)?;
        root.serialize_field("@xmlns", FEL_NS)?;
        root.serialize_field("dVerForm", FORM_VERSION)?;
        root.serialize_field("dId", self.unique_code)?;
        root.serialize_field("gDGen", &GeneralDataXml(self))?;
        for (index, item) in self.items.iter().enumerate() {
            root.serialize_field(
                "gItem",
                &ItemXml {
                    sequence: index + 1,
                    item,
                    amounts: &self.totals.items[index],
                },
            )?;
        }
        root.serialize_field("gTot", &TotalsXml(self))?;
        root.end()
    }
}

struct GeneralDataXml<'a, 'b>(&'b DocumentXml<'a>);

impl<'a, 'b> Serialize for GeneralDataXml<'a, 'b> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.0;
        let header = doc.header;
        let mut st = s.serialize_struct("gDGen", 0)?;
        st.serialize_field("iAmb", &header.environment.ambient_code().to_string())?;
        st.serialize_field("iTpEmis", &format!("{:02}", header.emission_type))?;
        st.serialize_field("iDoc", doc.document_type)?;
        st.serialize_field("dNroDF", &format!("{:010}", header.number))?;
        st.serialize_field("dPtoFacDF", &format!("{:0>3}", header.point_of_sale))?;
        st.serialize_field("dSeg", &header.security_code)?;
        st.serialize_field(
            "dFechaEm",
            &header.issue_datetime.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        )?;
        st.serialize_field("iNatOp", "01")?;
        st.serialize_field("iTipoOp", "1")?;
        st.serialize_field("iDest", &header.destination.to_string())?;
        st.serialize_field("iFormCAFE", "1")?;
        st.serialize_field("iEntCAFE", "1")?;
        st.serialize_field("dEnvFE", "1")?;
        st.serialize_field("iProGen", "1")?;
        st.serialize_field("iTipoTranVenta", "1")?;
        st.serialize_field(
            "gEmis",
            &IssuerXml {
                issuer: doc.issuer,
                ruc: doc.issuer_ruc,
                tables: doc.tables,
            },
        )?;
        st.serialize_field(
            "gDatRec",
            &CustomerXml {
                customer: doc.customer,
                tables: doc.tables,
            },
        )?;
        st.end()
    }
}

struct RucXml<'a> {
    tag: &'static str,
    ruc: &'a PartyRuc,
}

impl<'a> Serialize for RucXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.tag, 0)?;
        st.serialize_field("dTipoRuc", &self.ruc.taxpayer_type.to_string())?;
        st.serialize_field("dRuc", &self.ruc.ruc)?;
        match &self.ruc.check_digit {
            Some(dv) => st.serialize_field("dDV", dv)?,
            None => st.serialize_field("dDV", "")?,
        }
        st.end()
    }
}

struct LocationXml<'a> {
    tag: &'static str,
    code: Option<&'a str>,
    corregimiento: &'a str,
    district: &'a str,
    province: String,
}

impl<'a> LocationXml<'a> {
    fn province_name(tables: &CodeTables, code: u8) -> String {
        tables
            .province_name(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }
}

impl<'a> Serialize for LocationXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.tag, 0)?;
        st.serialize_field("dCodUbi", self.code.unwrap_or(GENERIC_LOCATION_CODE))?;
        st.serialize_field("dCorreg", self.corregimiento)?;
        st.serialize_field("dDistr", self.district)?;
        st.serialize_field("dProv", &self.province)?;
        st.end()
    }
}

struct IssuerXml<'a> {
    issuer: &'a Issuer,
    ruc: &'a PartyRuc,
    tables: &'a CodeTables,
}

impl<'a> Serialize for IssuerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let issuer = self.issuer;
        let mut st = s.serialize_struct("gEmis", 0)?;
        st.serialize_field(
            "gRucEmi",
            &RucXml {
                tag: "gRucEmi",
                ruc: self.ruc,
            },
        )?;
        st.serialize_field("dNombEm", &issuer.legal_name)?;
        st.serialize_field("dSucEm", &issuer.branch_code)?;
        if let Some(coordinates) = &issuer.coordinates {
            st.serialize_field("dCoordEm", coordinates)?;
        }
        st.serialize_field("dDirecEm", &issuer.address)?;
        st.serialize_field(
            "gUbiEm",
            &LocationXml {
                tag: "gUbiEm",
                code: issuer.location_code.as_deref(),
                corregimiento: &issuer.corregimiento_name,
                district: &issuer.district_name,
                province: LocationXml::province_name(self.tables, issuer.province_code),
            },
        )?;
        if let Some(phone) = &issuer.phone {
            st.serialize_field("dTfnEm", phone)?;
        }
        if let Some(email) = &issuer.email {
            st.serialize_field("dCorElectEmi", email)?;
        }
        st.end()
    }
}

struct CustomerXml<'a> {
    customer: &'a NormalizedCustomer,
    tables: &'a CodeTables,
}

impl<'a> Serialize for CustomerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let customer = self.customer;
        let ruc = PartyRuc::for_customer(customer);
        let mut st = s.serialize_struct("gDatRec", 0)?;
        st.serialize_field("iTipoRec", &format!("{:02}", customer.client_type_code))?;
        st.serialize_field(
            "gRucRec",
            &RucXml {
                tag: "gRucRec",
                ruc: &ruc,
            },
        )?;
        st.serialize_field("dNombRec", &customer.legal_name)?;
        if let Some(address) = &customer.address {
            st.serialize_field("dDirecRec", address)?;
        }
        st.serialize_field(
            "gUbiRec",
            &LocationXml {
                tag: "gUbiRec",
                code: customer.location_code.as_deref(),
                corregimiento: &customer.corregimiento_name,
                district: &customer.district_name,
                province: LocationXml::province_name(self.tables, customer.province_code),
            },
        )?;
        if let Some(phone) = &customer.phone {
            st.serialize_field("dTfnRec", phone)?;
        }
        if let Some(email) = &customer.email {
            st.serialize_field("dCorElectRec", email)?;
        }
        st.serialize_field("cPaisRec", &customer.country_code)?;
        st.end()
    }
}

struct ItemXml<'a> {
    sequence: usize,
    item: &'a NormalizedInvoiceItem,
    amounts: &'a ItemAmounts,
}

impl<'a> Serialize for ItemXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.item;
        let mut st = s.serialize_struct("gItem", 0)?;
        st.serialize_field("dSecItem", &self.sequence.to_string())?;
        st.serialize_field("dDescProd", &item.description)?;
        if let Some(code) = &item.code {
            st.serialize_field("dCodProd", code)?;
        }
        if let Some(unit) = &item.unit {
            st.serialize_field("cUnidad", unit)?;
        }
        st.serialize_field("dCantCodInt", &item.quantity)?;
        st.serialize_field(
            "gPrecios",
            &PricesXml {
                item,
                line_total: amount(self.amounts.line_total),
            },
        )?;
        st.serialize_field(
            "gITBMSItem",
            &ItemTaxXml {
                rate_code: self.amounts.rate_code,
                tax: amount(self.amounts.tax),
            },
        )?;
        st.end()
    }
}

struct PricesXml<'a> {
    item: &'a NormalizedInvoiceItem,
    line_total: String,
}

impl<'a> Serialize for PricesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.item;
        let mut st = s.serialize_struct("gPrecios", 0)?;
        st.serialize_field("dPrUnit", &item.unit_price)?;
        st.serialize_field("dPrUnitDesc", &item.discounted_unit_price)?;
        st.serialize_field("dPrItem", &item.item_total)?;
        st.serialize_field("dPrAcarItem", &item.freight_amount)?;
        st.serialize_field("dPrSegItem", &item.insurance_amount)?;
        st.serialize_field("dValTotItem", &self.line_total)?;
        st.end()
    }
}

struct ItemTaxXml {
    rate_code: &'static str,
    tax: String,
}

impl Serialize for ItemTaxXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("gITBMSItem", 0)?;
        st.serialize_field("dTasaITBMS", self.rate_code)?;
        st.serialize_field("dValITBMS", &self.tax)?;
        st.end()
    }
}

struct TotalsXml<'a, 'b>(&'b DocumentXml<'a>);

impl<'a, 'b> Serialize for TotalsXml<'a, 'b> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.0;
        let totals = doc.totals;
        let payment_code = doc.tables.payment_method_code(&doc.header.payment_method);
        // credit sales are paid over time, everything else up front
        let payment_term = if payment_code == "01" { "2" } else { "1" };

        let mut st = s.serialize_struct("gTot", 0)?;
        st.serialize_field("dTotNeto", &amount(totals.net))?;
        st.serialize_field("dTotITBMS", &amount(totals.tax))?;
        st.serialize_field("dTotGravado", &amount(totals.tax))?;
        st.serialize_field("dTotDesc", &amount(totals.discount))?;
        st.serialize_field("dVTot", &amount(totals.total))?;
        st.serialize_field("dTotRec", &amount(totals.total))?;
        st.serialize_field("iPzPag", payment_term)?;
        st.serialize_field("dNroItems", &doc.items.len().to_string())?;
        st.serialize_field("dVTotItems", &amount(totals.total))?;
        st.serialize_field(
            "gFormaPago",
            &PaymentXml {
                code: payment_code,
                amount: amount(totals.total),
            },
        )?;
        st.end()
    }
}

struct PaymentXml {
    code: &'static str,
    amount: String,
}

impl Serialize for PaymentXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("gFormaPago", 0)?;
        st.serialize_field("iFormaPago", self.code)?;
        st.serialize_field("dVlrCuota", &self.amount)?;
        st.end()
    }
}
