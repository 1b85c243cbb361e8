//! Structural checks over candidate `rFE` documents.
//!
//! The validator is advisory: it never mutates the document and never fails.
//! Problems are collected into a [`ValidationReport`] that callers use to gate
//! signing and submission.
use super::CriticalField;
use super::normalize::{is_location_code, validate_decimal_format};
use super::xml::constants::ROOT_TAG;
use super::{AMOUNT_PRECISION, QUANTITY_PRECISION, UNIT_PRICE_PRECISION};
use libxml::{parser::Parser, tree::Document, tree::Node, xpath};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Leaves that must be present and non-empty, as element paths.
pub const REQUIRED_FIELDS: &[&str] = &[
    "dVerForm",
    "dId",
    "gDGen/iAmb",
    "gDGen/iTpEmis",
    "gDGen/iDoc",
    "gDGen/dNroDF",
    "gDGen/dPtoFacDF",
    "gDGen/dFechaEm",
    "gEmis/gRucEmi/dRuc",
    "gEmis/gRucEmi/dDV",
    "gEmis/dNombEm",
    "gEmis/dDirecEm",
    "gUbiEm/dCodUbi",
    "gDatRec/iTipoRec",
    "gDatRec/gRucRec/dRuc",
    "gDatRec/dNombRec",
    "gItem/dDescProd",
    "gItem/dCantCodInt",
    "gPrecios/dPrUnit",
    "gPrecios/dPrItem",
    "gPrecios/dValTotItem",
    "gITBMSItem/dTasaITBMS",
    "gITBMSItem/dValITBMS",
    "gTot/dTotNeto",
    "gTot/dTotITBMS",
    "gTot/dVTot",
    "gTot/dNroItems",
    "gFormaPago/iFormaPago",
];

const DECIMAL_FIELDS: &[(&str, u32)] = &[
    ("dCantCodInt", QUANTITY_PRECISION),
    ("dPrUnit", UNIT_PRICE_PRECISION),
    ("dPrUnitDesc", UNIT_PRICE_PRECISION),
    ("dPrItem", AMOUNT_PRECISION),
    ("dPrAcarItem", AMOUNT_PRECISION),
    ("dPrSegItem", AMOUNT_PRECISION),
    ("dValTotItem", AMOUNT_PRECISION),
    ("dValITBMS", AMOUNT_PRECISION),
    ("dTotNeto", AMOUNT_PRECISION),
    ("dTotITBMS", AMOUNT_PRECISION),
    ("dTotGravado", AMOUNT_PRECISION),
    ("dTotDesc", AMOUNT_PRECISION),
    ("dVTot", AMOUNT_PRECISION),
    ("dTotRec", AMOUNT_PRECISION),
    ("dVTotItems", AMOUNT_PRECISION),
    ("dVlrCuota", AMOUNT_PRECISION),
];

const PLACEHOLDER_VALUES: [&str; 2] = ["null", "undefined"];

/// Outcome of a structural validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub critical_fields: Vec<CriticalField>,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Structural validator over a fixed required-field list.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::validation::StructuralValidator;
///
/// let report = StructuralValidator::new().validate("<factura/>");
/// assert!(!report.is_valid);
/// assert_eq!(report.errors.len(), 1);
/// assert!(report.errors[0].contains("rFE"));
/// ```
#[derive(Debug, Clone)]
pub struct StructuralValidator {
    required_fields: Vec<&'static str>,
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::with_required_fields(REQUIRED_FIELDS)
    }

    pub fn with_required_fields(fields: &[&'static str]) -> Self {
        Self {
            required_fields: fields.to_vec(),
        }
    }

    /// Run every check over `xml`.
    pub fn validate(&self, xml: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(doc) = parse_with_root(xml) else {
            report
                .errors
                .push(format!("Document root element <{ROOT_TAG}> not found"));
            return report.finish();
        };
        let ctx = match xpath::Context::new(&doc) {
            Ok(ctx) => ctx,
            Err(_) => {
                report
                    .errors
                    .push("Failed to create XPath context for document".to_string());
                return report.finish();
            }
        };

        self.check_required(&ctx, &mut report);
        check_placeholders(&ctx, &mut report);
        check_locations(&ctx, &mut report);
        check_decimals(&ctx, &mut report);

        let report = report.finish();
        if !report.is_valid {
            tracing::warn!(
                errors = report.errors.len(),
                warnings = report.warnings.len(),
                "structural validation failed"
            );
        } else if !report.warnings.is_empty() {
            tracing::warn!(warnings = report.warnings.len(), "structural validation warnings");
        }
        report
    }

    fn check_required(&self, ctx: &xpath::Context, report: &mut ValidationReport) {
        for path in &self.required_fields {
            let nodes = nodes_at(ctx, &path_expression(path));
            if nodes.is_empty() {
                report.errors.push(format!("Missing required field {path}"));
                continue;
            }
            for node in nodes {
                if node.get_content().trim().is_empty() {
                    report
                        .errors
                        .push(format!("Required field {path} is empty"));
                }
            }
        }
    }
}

/// Render a report as a human-readable banner.
pub fn generate_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "DOCUMENT VALIDATION: {}",
        if report.is_valid { "VALID" } else { "INVALID" }
    );
    let _ = writeln!(out, "{rule}");

    if !report.errors.is_empty() {
        let _ = writeln!(out, "Errors ({}):", report.errors.len());
        for (i, error) in report.errors.iter().enumerate() {
            let _ = writeln!(out, "  {}. {error}", i + 1);
        }
    }
    if !report.warnings.is_empty() {
        let _ = writeln!(out, "Warnings ({}):", report.warnings.len());
        for (i, warning) in report.warnings.iter().enumerate() {
            let _ = writeln!(out, "  {}. {warning}", i + 1);
        }
    }
    if !report.critical_fields.is_empty() {
        let _ = writeln!(out, "Critical fields:");
        for field in &report.critical_fields {
            let _ = writeln!(out, "  - {} = {:?}", field.name, field.value);
        }
    }
    if report.errors.is_empty() && report.warnings.is_empty() {
        let _ = writeln!(out, "No issues found.");
    }
    out
}

fn parse_with_root(xml: &str) -> Option<Document> {
    let doc = Parser::default().parse_string(xml).ok()?;
    let root = doc.get_root_element()?;
    (root.get_name() == ROOT_TAG).then_some(doc)
}

// "gTot/dVTot" -> //*[local-name()='gTot']/*[local-name()='dVTot']
fn path_expression(path: &str) -> String {
    let steps: Vec<String> = path
        .split('/')
        .map(|step| format!("*[local-name()='{step}']"))
        .collect();
    format!("//{}", steps.join("/"))
}

fn nodes_at(ctx: &xpath::Context, expr: &str) -> Vec<Node> {
    ctx.evaluate(expr)
        .map(|object| object.get_nodes_as_vec())
        .unwrap_or_default()
}

fn leaf_path(node: &Node) -> String {
    match node.get_parent() {
        Some(parent) if parent.get_name() != ROOT_TAG => {
            format!("{}/{}", parent.get_name(), node.get_name())
        }
        _ => node.get_name(),
    }
}

fn check_placeholders(ctx: &xpath::Context, report: &mut ValidationReport) {
    for node in nodes_at(ctx, "//*[not(*)]") {
        let value = node.get_content();
        let trimmed = value.trim();
        if PLACEHOLDER_VALUES
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
        {
            let name = leaf_path(&node);
            report.errors.push(format!(
                "Field {name} contains placeholder value {trimmed:?}"
            ));
            report.critical_fields.push(CriticalField {
                name,
                value: trimmed.to_string(),
            });
        }
    }
}

fn check_locations(ctx: &xpath::Context, report: &mut ValidationReport) {
    for node in nodes_at(ctx, "//*[local-name()='dCodUbi']") {
        let code = node.get_content();
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        let name = leaf_path(&node);
        if !is_location_code(code) {
            report
                .warnings
                .push(format!("Malformed location code {code:?} in {name}"));
        } else if code.chars().all(|ch| ch == '1' || ch == '-') {
            report.warnings.push(format!(
                "Generic location code {code} in {name}; verify the real corregimiento"
            ));
        }
    }
}

fn check_decimals(ctx: &xpath::Context, report: &mut ValidationReport) {
    for (field, precision) in DECIMAL_FIELDS {
        for node in nodes_at(ctx, &path_expression(field)) {
            let value = node.get_content();
            let value = value.trim();
            if value.is_empty()
                || PLACEHOLDER_VALUES
                    .iter()
                    .any(|token| value.eq_ignore_ascii_case(token))
            {
                continue;
            }
            if !validate_decimal_format(value, *precision) {
                report.errors.push(format!(
                    "Field {} must have {precision} decimal places, got {value:?}",
                    leaf_path(&node)
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rFE xmlns="http://dgi-fep.mef.gob.pa"><dVerForm>1.00</dVerForm><dId>FE01</dId><gDGen><iAmb>2</iAmb><iTpEmis>01</iTpEmis><iDoc>01</iDoc><dNroDF>0000000001</dNroDF><dPtoFacDF>001</dPtoFacDF><dFechaEm>2025-03-01T10:00:00-05:00</dFechaEm><gEmis><gRucEmi><dTipoRuc>2</dTipoRuc><dRuc>155596713-2-2015</dRuc><dDV>59</dDV></gRucEmi><dNombEm>EMPRESA</dNombEm><dDirecEm>Calle 50</dDirecEm><gUbiEm><dCodUbi>8-8-7</dCodUbi></gUbiEm></gEmis><gDatRec><iTipoRec>02</iTipoRec><gRucRec><dRuc>8-442-445</dRuc></gRucRec><dNombRec>CLIENTE</dNombRec><gUbiRec><dCodUbi>8-8-8</dCodUbi></gUbiRec></gDatRec></gDGen><gItem><dDescProd>Soporte</dDescProd><dCantCodInt>1.0000</dCantCodInt><gPrecios><dPrUnit>10.000000</dPrUnit><dPrItem>10.00</dPrItem><dValTotItem>10.70</dValTotItem></gPrecios><gITBMSItem><dTasaITBMS>01</dTasaITBMS><dValITBMS>0.70</dValITBMS></gITBMSItem></gItem><gTot><dTotNeto>10.00</dTotNeto><dTotITBMS>0.70</dTotITBMS><dVTot>10.70</dVTot><dNroItems>1</dNroItems><gFormaPago><iFormaPago>02</iFormaPago></gFormaPago></gTot></rFE>"#;

    #[test]
    fn minimal_document_is_valid() {
        let report = StructuralValidator::new().validate(MINIMAL);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn wrong_root_stops_after_one_error() {
        let xml = MINIMAL.replace("rFE", "rFactura");
        let report = StructuralValidator::new().validate(&xml);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("rFE"));

        let report = StructuralValidator::new().validate("not xml at all");
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn empty_required_field_is_reported() {
        let xml = MINIMAL.replace("<dNombRec>CLIENTE</dNombRec>", "<dNombRec></dNombRec>");
        let report = StructuralValidator::new().validate(&xml);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("dNombRec"));
        assert!(report.errors[0].contains("empty"));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let xml = MINIMAL.replace("<dVTot>10.70</dVTot>", "");
        let report = StructuralValidator::new().validate(&xml);
        assert_eq!(report.errors, vec!["Missing required field gTot/dVTot".to_string()]);
    }

    #[test]
    fn placeholder_text_is_flagged_as_critical() {
        let xml = MINIMAL.replace("<dDirecEm>Calle 50</dDirecEm>", "<dDirecEm>undefined</dDirecEm>");
        let report = StructuralValidator::new().validate(&xml);
        assert!(!report.is_valid);
        assert_eq!(
            report.critical_fields,
            vec![CriticalField {
                name: "gEmis/dDirecEm".into(),
                value: "undefined".into(),
            }]
        );
    }

    #[test]
    fn generic_and_malformed_locations_warn() {
        let xml = MINIMAL
            .replace("<dCodUbi>8-8-8</dCodUbi>", "<dCodUbi>1-1-1</dCodUbi>")
            .replace("<dCodUbi>8-8-7</dCodUbi>", "<dCodUbi>8/8/7</dCodUbi>");
        let report = StructuralValidator::new().validate(&xml);
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("1-1-1")));
        assert!(report.warnings.iter().any(|w| w.contains("Malformed")));
    }

    #[test]
    fn decimal_precision_is_checked() {
        let xml = MINIMAL.replace("<dPrUnit>10.000000</dPrUnit>", "<dPrUnit>10.00</dPrUnit>");
        let report = StructuralValidator::new().validate(&xml);
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("gPrecios/dPrUnit"));
    }

    #[test]
    fn report_banner_reflects_outcome() {
        let valid = generate_report(&StructuralValidator::new().validate(MINIMAL));
        assert!(valid.contains("DOCUMENT VALIDATION: VALID"));
        assert!(valid.contains("No issues found."));

        let xml = MINIMAL.replace("<dId>FE01</dId>", "<dId>null</dId>");
        let invalid = generate_report(&StructuralValidator::new().validate(&xml));
        assert!(invalid.contains("DOCUMENT VALIDATION: INVALID"));
        assert!(invalid.contains("Errors (1):"));
        assert!(invalid.contains("Critical fields:"));
        assert!(invalid.contains("dId = \"null\""));
    }
}
