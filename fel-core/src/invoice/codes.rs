//! Authority code vocabularies.
//!
//! Internal names for payment methods, document types and tax rates map onto
//! the DGI's two-digit codes. Unmapped names fall back to a safe code instead of
//! failing generation.
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

const DEFAULT_PAYMENT_METHOD: &str = "99";
const DEFAULT_DOCUMENT_TYPE: &str = "01";
const DEFAULT_TAX_RATE: &str = "00";

static STANDARD: LazyLock<CodeTables> = LazyLock::new(CodeTables::build_standard);

/// Immutable lookup tables injected into the XML generator.
#[derive(Debug, Clone)]
pub struct CodeTables {
    payment_methods: HashMap<&'static str, &'static str>,
    document_types: HashMap<&'static str, &'static str>,
    tax_rates: Vec<(Decimal, &'static str)>,
    provinces: HashMap<u8, &'static str>,
}

impl CodeTables {
    /// Tables for the current DGI technical specification, built once.
    pub fn standard() -> &'static CodeTables {
        &STANDARD
    }

    /// Build tables from explicit entries, e.g. for a newer code list.
    ///
    /// Name keys must already be folded: lowercase, unaccented, `_` for spaces.
    pub fn from_entries(
        payment_methods: impl IntoIterator<Item = (&'static str, &'static str)>,
        document_types: impl IntoIterator<Item = (&'static str, &'static str)>,
        tax_rates: impl IntoIterator<Item = (Decimal, &'static str)>,
        provinces: impl IntoIterator<Item = (u8, &'static str)>,
    ) -> Self {
        Self {
            payment_methods: payment_methods.into_iter().collect(),
            document_types: document_types.into_iter().collect(),
            tax_rates: tax_rates.into_iter().collect(),
            provinces: provinces.into_iter().collect(),
        }
    }

    fn build_standard() -> Self {
        let payment_methods = [
            ("credito", "01"),
            ("efectivo", "02"),
            ("contado", "02"),
            ("tarjeta_credito", "03"),
            ("tarjeta_debito", "04"),
            ("fidelizacion", "05"),
            ("vale", "06"),
            ("tarjeta_regalo", "07"),
            ("transferencia", "08"),
            ("deposito", "08"),
            ("ach", "08"),
            ("cheque", "09"),
            ("punto_de_pago", "10"),
            ("otro", "99"),
        ];
        let document_types = [
            ("factura", "01"),
            ("factura_operacion_interna", "01"),
            ("importacion", "02"),
            ("factura_importacion", "02"),
            ("exportacion", "03"),
            ("factura_exportacion", "03"),
            ("nota_credito", "04"),
            ("nota_debito", "05"),
            ("nota_credito_generica", "06"),
            ("nota_debito_generica", "07"),
            ("zona_franca", "08"),
            ("factura_zona_franca", "08"),
            ("reembolso", "09"),
        ];
        let tax_rates = [
            (Decimal::ZERO, "00"),
            (Decimal::from(7), "01"),
            (Decimal::from(10), "02"),
            (Decimal::from(15), "03"),
        ];
        let provinces = [
            (1, "Bocas del Toro"),
            (2, "Coclé"),
            (3, "Colón"),
            (4, "Chiriquí"),
            (5, "Darién"),
            (6, "Herrera"),
            (7, "Los Santos"),
            (8, "Panamá"),
            (9, "Veraguas"),
            (10, "Guna Yala"),
            (11, "Emberá-Wounaan"),
            (12, "Ngäbe-Buglé"),
            (13, "Panamá Oeste"),
        ];
        Self::from_entries(payment_methods, document_types, tax_rates, provinces)
    }

    /// `iFormaPago` code; accepts internal names or an existing code.
    pub fn payment_method_code(&self, method: &str) -> &'static str {
        lookup(&self.payment_methods, method).unwrap_or(DEFAULT_PAYMENT_METHOD)
    }

    /// `iDoc` code; accepts internal names or an existing code.
    pub fn document_type_code(&self, document_type: &str) -> &'static str {
        lookup(&self.document_types, document_type).unwrap_or(DEFAULT_DOCUMENT_TYPE)
    }

    /// `dTasaITBMS` code for a percentage such as `"7"` or `"7.00"`.
    pub fn tax_rate_code(&self, rate: &str) -> &'static str {
        self.resolve_tax_rate(rate).code
    }

    /// Code and the percentage it stands for. Unmapped rates resolve to the
    /// exempt code at 0%, so the charged tax always agrees with the code.
    pub fn resolve_tax_rate(&self, rate: &str) -> TaxRate {
        let exempt = TaxRate {
            code: DEFAULT_TAX_RATE,
            percent: Decimal::ZERO,
        };
        let Ok(rate) = Decimal::from_str(rate.trim()) else {
            return exempt;
        };
        self.tax_rates
            .iter()
            .find(|(known, _)| *known == rate)
            .map(|(percent, code)| TaxRate {
                code: *code,
                percent: *percent,
            })
            .unwrap_or(exempt)
    }

    pub fn province_name(&self, code: u8) -> Option<&'static str> {
        self.provinces.get(&code).copied()
    }
}

/// A resolved `dTasaITBMS` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxRate {
    pub code: &'static str,
    pub percent: Decimal,
}

impl Default for CodeTables {
    fn default() -> Self {
        CodeTables::standard().clone()
    }
}

fn lookup(table: &HashMap<&'static str, &'static str>, raw: &str) -> Option<&'static str> {
    let key = fold_key(raw);
    if let Some(code) = table.get(key.as_str()) {
        return Some(*code);
    }
    table.values().copied().find(|code| *code == key)
}

fn fold_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|ch| match ch {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            ' ' | '-' => '_',
            other => other,
        })
        .collect()
}
