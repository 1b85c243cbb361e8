//! Coercion of raw records into fixed-precision, schema-ready values.
//!
//! Numeric normalization never fails: null, missing and unparseable inputs fall
//! back to zero (or `None` when the caller allows it). Only structurally
//! unusable records, such as a customer with no tax ID, are rejected.
use super::raw::{RawRecord, RawValue};
use super::{
    AMOUNT_PRECISION, FormatError, InvoiceHeader, Issuer, NormalizedCustomer,
    NormalizedInvoiceItem, QUANTITY_PRECISION, TAX_RATE_PRECISION, UNIT_PRICE_PRECISION,
};
use crate::config::EnvironmentType;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

const NULL_TOKENS: [&str; 4] = ["", "nan", "null", "undefined"];
// Panama does not observe daylight saving time
const PANAMA_OFFSET_SECS: i32 = -5 * 3600;

/// Normalize a raw value to a fixed-precision decimal string.
///
/// Null, missing and empty values return `None` when `allow_null` is set and
/// `"0.<precision zeros>"` otherwise. Values that cannot be parsed, negative
/// amounts, `NaN` and infinities use the same zero fallback. Rounding is half
/// away from zero.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::{normalize_decimal, RawValue};
///
/// assert_eq!(normalize_decimal(Some(&RawValue::Number(26.724547)), 6, false).as_deref(), Some("26.724547"));
/// assert_eq!(normalize_decimal(Some(&RawValue::Text("1,234.5".into())), 2, false).as_deref(), Some("1234.50"));
/// assert_eq!(normalize_decimal(None, 2, true), None);
/// assert_eq!(normalize_decimal(Some(&RawValue::Text("n/a".into())), 2, false).as_deref(), Some("0.00"));
/// ```
pub fn normalize_decimal(
    value: Option<&RawValue>,
    precision: u32,
    allow_null: bool,
) -> Option<String> {
    let parsed = match value {
        None | Some(RawValue::Null) => None,
        Some(RawValue::Number(n)) => Some(parse_number(*n)),
        Some(RawValue::Text(text)) => {
            if is_null_token(text) {
                None
            } else {
                Some(parse_text(text))
            }
        }
    };

    match parsed {
        None if allow_null => None,
        None => Some(fixed(Decimal::ZERO, precision)),
        Some(decimal) => Some(fixed(decimal.unwrap_or(Decimal::ZERO), precision)),
    }
}

/// Quantity with four fractional digits. A zero quantity is lifted to the
/// minimum billable quantity `1.0000`.
pub fn normalize_quantity(value: Option<&RawValue>) -> String {
    let normalized = normalize_decimal(value, QUANTITY_PRECISION, false)
        .unwrap_or_else(|| fixed(Decimal::ZERO, QUANTITY_PRECISION));
    if is_zero(&normalized) {
        fixed(Decimal::ONE, QUANTITY_PRECISION)
    } else {
        normalized
    }
}

pub fn normalize_unit_price(value: Option<&RawValue>) -> String {
    non_null(value, UNIT_PRICE_PRECISION)
}

pub fn normalize_amount(value: Option<&RawValue>) -> String {
    non_null(value, AMOUNT_PRECISION)
}

pub fn normalize_tax_rate(value: Option<&RawValue>) -> String {
    non_null(value, TAX_RATE_PRECISION)
}

/// Trim a raw value into text. `""`, `nan`, `null` and `undefined` (any case)
/// collapse to `None` when `empty_as_null` is set and to `Some("")` otherwise.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::{normalize_string, RawValue};
///
/// assert_eq!(normalize_string(Some(&RawValue::Text("NaN".into())), true), None);
/// assert_eq!(normalize_string(Some(&RawValue::Text(" Texto ".into())), true).as_deref(), Some("Texto"));
/// assert_eq!(normalize_string(None, false).as_deref(), Some(""));
/// ```
pub fn normalize_string(value: Option<&RawValue>, empty_as_null: bool) -> Option<String> {
    let text = value
        .and_then(RawValue::as_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !is_null_token(text));
    match text {
        Some(text) => Some(text),
        None if empty_as_null => None,
        None => Some(String::new()),
    }
}

/// Whether `value` is digits, a dot, and exactly `precision` fractional digits.
pub fn validate_decimal_format(value: &str, precision: u32) -> bool {
    let Some((int_part, frac_part)) = value.split_once('.') else {
        return false;
    };
    !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.len() == precision as usize
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a decimal string produced by this module back into a [`Decimal`].
pub(crate) fn to_decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or(Decimal::ZERO)
}

/// Render a decimal with exactly `precision` fractional digits.
pub(crate) fn fixed(value: Decimal, precision: u32) -> String {
    let mut rounded =
        value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(precision);
    if rounded.scale() != precision {
        // too large to carry the requested scale
        let mut zero = Decimal::ZERO;
        zero.rescale(precision);
        return zero.to_string();
    }
    rounded.to_string()
}

fn non_null(value: Option<&RawValue>, precision: u32) -> String {
    normalize_decimal(value, precision, false).unwrap_or_else(|| fixed(Decimal::ZERO, precision))
}

fn is_zero(normalized: &str) -> bool {
    normalized.bytes().all(|b| b == b'0' || b == b'.')
}

fn is_null_token(text: &str) -> bool {
    let trimmed = text.trim();
    NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

fn parse_number(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&n.to_string()).ok().filter(|d| !d.is_sign_negative())
}

fn parse_text(text: &str) -> Option<Decimal> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix('$') {
        body = rest;
    } else if body
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("b/."))
    {
        body = &body[3..];
    }
    let cleaned: String = body
        .chars()
        .filter(|ch| !matches!(ch, ',' | '_') && !ch.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .filter(|d| !d.is_sign_negative())
}

fn text(record: &RawRecord, aliases: &[&str]) -> Option<String> {
    normalize_string(record.get_any(aliases), true)
}

fn small_int(record: &RawRecord, aliases: &[&str]) -> Option<u8> {
    let raw = text(record, aliases)?;
    raw.parse::<u8>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|n| n.fract() == 0.0 && (0.0..=255.0).contains(n))
            .map(|n| n as u8)
    })
}

fn location_code(record: &RawRecord, aliases: &[&str]) -> Option<String> {
    text(record, aliases).filter(|code| is_location_code(code))
}

/// `\d+-\d+-\d+`
pub(crate) fn is_location_code(code: &str) -> bool {
    let parts: Vec<&str> = code.split('-').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Normalize a raw line item.
///
/// A missing line total is derived as `quantity × (unit price − discount)`.
pub fn normalize_item(record: &RawRecord) -> NormalizedInvoiceItem {
    let description = text(record, &["descripcion", "description", "descripcion_producto"])
        .unwrap_or_else(|| "SERVICE".to_string());
    let quantity = normalize_quantity(record.get_any(&["cantidad", "quantity"]));
    let unit_price = normalize_unit_price(record.get_any(&["precio_unitario", "unit_price"]));
    let discounted_unit_price = normalize_unit_price(record.get_any(&[
        "precio_unitario_descuento",
        "descuento_unitario",
        "unit_discount",
    ]));

    let item_total = normalize_decimal(
        record.get_any(&["precio_item", "total_item", "item_total"]),
        AMOUNT_PRECISION,
        true,
    )
    .unwrap_or_else(|| {
        let net = (to_decimal(&unit_price) - to_decimal(&discounted_unit_price)).max(Decimal::ZERO);
        fixed(to_decimal(&quantity) * net, AMOUNT_PRECISION)
    });

    NormalizedInvoiceItem {
        description,
        code: text(record, &["codigo", "code", "codigo_producto"]),
        unit: text(record, &["unidad", "unit", "unidad_medida"]),
        quantity,
        unit_price,
        discounted_unit_price,
        item_total,
        freight_amount: normalize_amount(record.get_any(&["precio_acarreo", "acarreo", "freight"])),
        insurance_amount: normalize_amount(record.get_any(&["precio_seguro", "seguro", "insurance"])),
        tax_rate: normalize_tax_rate(record.get_any(&["tasa_itbms", "itbms", "tax_rate"])),
    }
}

/// Normalize a raw customer record.
///
/// # Errors
/// Returns [`FormatError::MissingField`] when no tax ID is present.
pub fn normalize_customer(record: &RawRecord) -> Result<NormalizedCustomer, FormatError> {
    let tax_id = text(record, &["numero_ruc", "ruc", "tax_id", "cedula"])
        .ok_or(FormatError::MissingField { field: "tax_id" })?;

    Ok(NormalizedCustomer {
        client_type_code: small_int(record, &["tipo_cliente_fe", "tipo_cliente", "client_type"])
            .unwrap_or(2),
        taxpayer_type_code: small_int(record, &["tipo_contribuyente", "taxpayer_type"]),
        tax_id,
        check_digit: text(record, &["digito_verificador", "dv", "check_digit"]),
        legal_name: text(record, &["razon_social", "nombre", "legal_name", "name"])
            .unwrap_or_else(|| "CUSTOMER".to_string()),
        address: text(record, &["direccion", "address"]),
        phone: text(record, &["telefono", "phone"]),
        email: text(record, &["correo_electronico", "correo", "email"]),
        location_code: location_code(record, &["codigo_ubicacion", "ubicacion", "location_code"]),
        province_code: small_int(record, &["provincia", "codigo_provincia", "province"])
            .unwrap_or(1),
        district_name: text(record, &["distrito", "district"]).unwrap_or_else(|| "N/A".into()),
        corregimiento_name: text(record, &["corregimiento"]).unwrap_or_else(|| "N/A".into()),
        country_code: text(record, &["pais", "codigo_pais", "country_code", "country"])
            .map(|code| code.to_uppercase())
            .unwrap_or_else(|| "PA".into()),
    })
}

/// Normalize the issuing organization.
///
/// # Errors
/// Returns [`FormatError::MissingField`] when the RUC or legal name is absent.
pub fn normalize_issuer(record: &RawRecord) -> Result<Issuer, FormatError> {
    let ruc = text(record, &["ruc", "numero_ruc", "tax_id"])
        .ok_or(FormatError::MissingField { field: "ruc" })?;
    let legal_name = text(record, &["razon_social", "nombre", "legal_name", "name"])
        .ok_or(FormatError::MissingField { field: "legal_name" })?;
    let branch_code = text(record, &["sucursal", "codigo_sucursal", "branch_code"])
        .map(|code| format!("{code:0>4}"))
        .unwrap_or_else(|| "0000".into());

    Ok(Issuer {
        ruc,
        check_digit: text(record, &["dv", "digito_verificador", "check_digit"]),
        taxpayer_type: small_int(record, &["tipo_contribuyente", "taxpayer_type"]),
        legal_name,
        branch_code,
        coordinates: text(record, &["coordenadas", "coordinates"]),
        address: text(record, &["direccion", "address"]).unwrap_or_else(|| "N/A".into()),
        location_code: location_code(record, &["codigo_ubicacion", "ubicacion", "location_code"]),
        corregimiento_name: text(record, &["corregimiento"]).unwrap_or_else(|| "N/A".into()),
        district_name: text(record, &["distrito", "district"]).unwrap_or_else(|| "N/A".into()),
        province_code: small_int(record, &["provincia", "codigo_provincia", "province"])
            .unwrap_or(8),
        phone: text(record, &["telefono", "phone"]),
        email: text(record, &["correo_electronico", "correo", "email"]),
    })
}

/// Normalize the document header. The environment comes from configuration,
/// never from the record.
///
/// # Errors
/// Returns [`FormatError`] when the document number or issue date is missing
/// or unparseable.
pub fn normalize_header(
    record: &RawRecord,
    environment: EnvironmentType,
) -> Result<InvoiceHeader, FormatError> {
    let number_text = text(record, &["numero_documento", "numero", "number"])
        .ok_or(FormatError::MissingField { field: "number" })?;
    let number = number_text
        .parse::<u64>()
        .ok()
        .or_else(|| {
            number_text
                .parse::<f64>()
                .ok()
                .filter(|n| n.fract() == 0.0 && *n >= 0.0)
                .map(|n| n as u64)
        })
        .ok_or(FormatError::InvalidField {
            field: "number",
            value: number_text.clone(),
        })?;

    let date_text = text(record, &["fecha_emision", "issue_date", "fecha"])
        .ok_or(FormatError::MissingField { field: "issue_date" })?;
    let issue_datetime = parse_issue_datetime(&date_text).ok_or(FormatError::InvalidField {
        field: "issue_date",
        value: date_text.clone(),
    })?;

    let point_of_sale = text(record, &["punto_facturacion", "punto_de_venta", "point_of_sale"])
        .map(|code| format!("{code:0>3}"))
        .unwrap_or_else(|| "001".into());
    let document_type = text(record, &["tipo_documento", "document_type"])
        .unwrap_or_else(|| "factura".into());

    let mut header = InvoiceHeader::new(document_type, number, point_of_sale, issue_datetime, environment);
    if let Some(code) = text(record, &["codigo_seguridad", "security_code"]) {
        header = header.with_security_code(format!("{code:0>9}"));
    }
    if let Some(method) = text(record, &["forma_pago", "metodo_pago", "payment_method"]) {
        header = header.with_payment_method(method);
    }
    if let Some(emission) = small_int(record, &["tipo_emision", "emission_type"]) {
        header = header.with_emission_type(emission);
    }
    if let Some(destination) = small_int(record, &["destino", "destination"]) {
        header = header.with_destination(destination);
    }
    Ok(header)
}

fn parse_issue_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    let offset = FixedOffset::east_opt(PANAMA_OFFSET_SECS)?;
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    offset.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn num(n: f64) -> RawValue {
        RawValue::Number(n)
    }

    fn txt(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn null_and_missing_follow_allow_null() {
        assert_eq!(normalize_decimal(None, 2, true), None);
        assert_eq!(normalize_decimal(Some(&RawValue::Null), 4, false).as_deref(), Some("0.0000"));
        assert_eq!(normalize_decimal(Some(&txt("undefined")), 6, false).as_deref(), Some("0.000000"));
        assert_eq!(normalize_decimal(Some(&txt("")), 2, true), None);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(normalize_decimal(Some(&txt("2.345")), 2, false).as_deref(), Some("2.35"));
        assert_eq!(normalize_decimal(Some(&txt("2.344")), 2, false).as_deref(), Some("2.34"));
        assert_eq!(normalize_decimal(Some(&num(0.125)), 2, false).as_deref(), Some("0.13"));
    }

    #[test]
    fn strips_separators_and_currency_markers() {
        assert_eq!(normalize_decimal(Some(&txt(" 1,250.5 ")), 2, false).as_deref(), Some("1250.50"));
        assert_eq!(normalize_decimal(Some(&txt("$10")), 2, false).as_deref(), Some("10.00"));
        assert_eq!(normalize_decimal(Some(&txt("B/. 3.5")), 2, false).as_deref(), Some("3.50"));
        assert_eq!(normalize_decimal(Some(&txt("1_000")), 2, false).as_deref(), Some("1000.00"));
    }

    #[test]
    fn negative_and_non_finite_fall_back_to_zero() {
        assert_eq!(normalize_decimal(Some(&num(-4.0)), 2, false).as_deref(), Some("0.00"));
        assert_eq!(normalize_decimal(Some(&txt("-4")), 2, false).as_deref(), Some("0.00"));
        assert_eq!(normalize_decimal(Some(&num(f64::NAN)), 2, false).as_deref(), Some("0.00"));
        assert_eq!(normalize_decimal(Some(&num(f64::INFINITY)), 2, false).as_deref(), Some("0.00"));
    }

    #[test]
    fn quantity_zero_is_lifted_to_one() {
        assert_eq!(normalize_quantity(Some(&num(0.0))), "1.0000");
        assert_eq!(normalize_quantity(None), "1.0000");
        assert_eq!(normalize_quantity(Some(&num(0.00001))), "1.0000");
        assert_eq!(normalize_quantity(Some(&num(2.5))), "2.5000");
    }

    #[test]
    fn strings_collapse_placeholder_tokens() {
        assert_eq!(normalize_string(Some(&txt("NaN")), true), None);
        assert_eq!(normalize_string(Some(&txt("Null")), false).as_deref(), Some(""));
        assert_eq!(normalize_string(Some(&txt(" Texto ")), true).as_deref(), Some("Texto"));
        assert_eq!(normalize_string(Some(&num(8.0)), true).as_deref(), Some("8"));
    }

    #[test]
    fn decimal_format_requires_exact_precision() {
        assert!(validate_decimal_format("1.0000", 4));
        assert!(!validate_decimal_format("1.000", 4));
        assert!(!validate_decimal_format("-1.00", 2));
        assert!(!validate_decimal_format("1", 2));
        assert!(!validate_decimal_format(".50", 2));
        assert!(!validate_decimal_format("1e2.00", 2));
    }

    #[test]
    fn missing_item_total_is_derived() {
        let record = RawRecord::new()
            .with("cantidad", 3)
            .with("precio_unitario", 10.0)
            .with("precio_unitario_descuento", 0.5);
        let item = normalize_item(&record);
        assert_eq!(item.item_total, "28.50");
        assert_eq!(item.description, "SERVICE");
        assert_eq!(item.tax_rate, "0.00");
        assert!(item.check_format().is_ok());
    }

    #[test]
    fn customer_defaults_and_location_filtering() {
        let record = RawRecord::new()
            .with("NUMERO_RUC", "8-442-445")
            .with("CODIGO_UBICACION", "8 8 8")
            .with("TELEFONO", "undefined");
        let customer = normalize_customer(&record).expect("customer");
        assert_eq!(customer.client_type_code, 2);
        assert_eq!(customer.legal_name, "CUSTOMER");
        assert_eq!(customer.location_code, None);
        assert_eq!(customer.phone, None);
        assert_eq!(customer.province_code, 1);
        assert_eq!(customer.district_name, "N/A");
        assert_eq!(customer.country_code, "PA");
    }

    #[test]
    fn customer_without_tax_id_is_rejected() {
        let record = RawRecord::new().with("razon_social", "Cliente");
        assert_eq!(
            normalize_customer(&record),
            Err(FormatError::MissingField { field: "tax_id" })
        );
    }

    #[test]
    fn header_parses_dates_and_pads_codes() {
        let record = RawRecord::new()
            .with("numero_documento", 42)
            .with("fecha_emision", "2025-03-01")
            .with("punto_facturacion", "1")
            .with("forma_pago", "credito");
        let header = normalize_header(&record, EnvironmentType::Sandbox).expect("header");
        assert_eq!(header.number, 42);
        assert_eq!(header.point_of_sale, "001");
        assert_eq!(header.security_code, "000000042");
        assert_eq!(header.payment_method, "credito");
        assert_eq!(
            header.issue_datetime.to_rfc3339(),
            "2025-03-01T00:00:00-05:00"
        );

        let missing = RawRecord::new().with("numero_documento", 1);
        assert_eq!(
            normalize_header(&missing, EnvironmentType::Sandbox),
            Err(FormatError::MissingField { field: "issue_date" })
        );
    }

    proptest! {
        #[test]
        fn output_always_matches_precision(
            precision in 1u32..=6,
            input in prop_oneof![
                any::<f64>().prop_map(RawValue::Number),
                ".*".prop_map(RawValue::Text),
                Just(RawValue::Null),
            ],
        ) {
            let out = normalize_decimal(Some(&input), precision, false).expect("non-null");
            prop_assert!(validate_decimal_format(&out, precision), "{out:?}");
        }

        #[test]
        fn valid_numbers_round_trip(value in 0.0f64..1.0e9, precision in 1u32..=6) {
            let out = normalize_decimal(Some(&RawValue::Number(value)), precision, false).expect("non-null");
            let expected = Decimal::from_str(&value.to_string())
                .expect("finite")
                .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
            prop_assert_eq!(to_decimal(&out), expected);
        }
    }
}
