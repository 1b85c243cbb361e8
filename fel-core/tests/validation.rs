mod common;

use fel_core::config::EnvironmentType;
use fel_core::invoice::raw::RawValue;
use fel_core::invoice::validation::{StructuralValidator, generate_report};
use fel_core::invoice::xml::XmlGenerator;
use fel_core::invoice::{
    CandidateDocument, normalize_customer, normalize_header, normalize_issuer, normalize_item,
};
use fel_core::pipeline::RawInvoice;

fn candidate(raw: &RawInvoice) -> CandidateDocument {
    let header = normalize_header(&raw.header, EnvironmentType::Sandbox).expect("header");
    let issuer = normalize_issuer(&raw.issuer).expect("issuer");
    let customer = normalize_customer(&raw.customer).expect("customer");
    let items: Vec<_> = raw.items.iter().map(normalize_item).collect();
    XmlGenerator::new()
        .generate_candidate(&header, &issuer, &customer, &items)
        .expect("generate candidate")
}

#[test]
fn generated_documents_pass_structural_validation() {
    let candidate = candidate(&common::sample_raw_invoice());
    let report = StructuralValidator::new().validate(candidate.xml());
    assert!(report.is_valid, "{}", generate_report(&report));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(report.critical_fields.is_empty());
    assert!(generate_report(&report).contains("No issues found."));
}

#[test]
fn missing_customer_location_is_only_a_warning() {
    let mut raw = common::sample_raw_invoice();
    raw.customer.insert("codigo_ubicacion", RawValue::Null);
    let report = StructuralValidator::new().validate(candidate(&raw).xml());
    assert!(report.is_valid, "{:?}", report.errors);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("1-1-1"), "{:?}", report.warnings);
    assert!(report.warnings[0].contains("gUbiRec/dCodUbi"), "{:?}", report.warnings);
}

#[test]
fn placeholder_leaking_into_xml_is_critical() {
    let xml = candidate(&common::sample_raw_invoice())
        .xml()
        .replace("<dNombRec>Cliente Final</dNombRec>", "<dNombRec>undefined</dNombRec>");
    let report = StructuralValidator::new().validate(&xml);
    assert!(!report.is_valid);
    assert!(
        report
            .errors
            .iter()
            .any(|e| e == r#"Field gDatRec/dNombRec contains placeholder value "undefined""#),
        "{:?}",
        report.errors
    );
    assert_eq!(report.critical_fields.len(), 1);
    assert_eq!(report.critical_fields[0].name, "gDatRec/dNombRec");
    assert_eq!(report.critical_fields[0].value, "undefined");

    let banner = generate_report(&report);
    assert!(banner.contains("DOCUMENT VALIDATION: INVALID"));
    assert!(banner.contains("Critical fields:"));
}

#[test]
fn precision_drift_is_reported() {
    let xml = candidate(&common::sample_raw_invoice())
        .xml()
        .replace("<dPrUnit>26.724547</dPrUnit>", "<dPrUnit>26.72</dPrUnit>");
    let report = StructuralValidator::new().validate(&xml);
    assert!(!report.is_valid);
    assert!(
        report
            .errors
            .iter()
            .any(|e| e.contains("gPrecios/dPrUnit") && e.contains("6 decimal places")),
        "{:?}",
        report.errors
    );
}

#[test]
fn report_serializes_to_json() {
    let report = StructuralValidator::new().validate("<factura/>");
    let json = serde_json::to_value(&report).expect("serialize report");
    assert_eq!(json["is_valid"], false);
    assert_eq!(json["errors"].as_array().map(Vec::len), Some(1));
}
