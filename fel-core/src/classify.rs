//! Authority response classification.
//!
//! Response codes are opaque to everything but this module. The catalog maps
//! each known code to a category and a friendly message; anything else is
//! [`ResponseCategory::Unknown`].
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

static STANDARD: LazyLock<ResponseCatalog> = LazyLock::new(ResponseCatalog::build_standard);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCategory {
    Success,
    Processing,
    Error,
    Unknown,
}

impl ResponseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCategory::Success => "success",
            ResponseCategory::Processing => "processing",
            ResponseCategory::Error => "error",
            ResponseCategory::Unknown => "unknown",
        }
    }

    /// Default follow-up for responses in this category.
    pub fn recovery(&self) -> RecoveryAction {
        match self {
            ResponseCategory::Success => RecoveryAction::None,
            ResponseCategory::Processing => RecoveryAction::PollStatus,
            ResponseCategory::Error => RecoveryAction::CorrectAndResubmit,
            ResponseCategory::Unknown => RecoveryAction::Investigate,
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    None,
    /// Query by unique document code on a backoff schedule; never resubmit.
    PollStatus,
    CorrectAndResubmit,
    Investigate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub category: ResponseCategory,
    pub friendly_message: &'static str,
    pub recovery: RecoveryAction,
}

/// Immutable code table injected into [`ResponseClassifier`].
#[derive(Debug, Clone)]
pub struct ResponseCatalog {
    entries: HashMap<&'static str, CatalogEntry>,
}

impl ResponseCatalog {
    pub fn standard() -> &'static ResponseCatalog {
        &STANDARD
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (&'static str, CatalogEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    fn build_standard() -> Self {
        use RecoveryAction as R;
        use ResponseCategory as C;
        let entry = |category: ResponseCategory,
                     friendly_message: &'static str,
                     recovery: RecoveryAction| CatalogEntry {
            category,
            friendly_message,
            recovery,
        };
        Self::from_entries([
            ("200", entry(C::Success, "Documento autorizado por la DGI", R::None)),
            ("201", entry(C::Success, "Documento anulado correctamente", R::None)),
            ("202", entry(C::Success, "Consulta de documento exitosa", R::None)),
            (
                "100",
                entry(C::Processing, "Documento recibido, en proceso de autorización", R::PollStatus),
            ),
            (
                "102",
                entry(C::Processing, "Servicio de la DGI no disponible, documento en cola", R::PollStatus),
            ),
            (
                "103",
                entry(C::Processing, "Documento en contingencia pendiente de transmisión", R::PollStatus),
            ),
            (
                "101",
                entry(C::Error, "Credenciales de acceso inválidas", R::Investigate),
            ),
            (
                "104",
                entry(C::Error, "Documento duplicado: ya fue recibido anteriormente", R::PollStatus),
            ),
            ("105", entry(C::Error, "RUC del emisor inválido", R::CorrectAndResubmit)),
            ("106", entry(C::Error, "RUC del receptor inválido", R::CorrectAndResubmit)),
            (
                "107",
                entry(C::Error, "Folios insuficientes para emitir el documento", R::Investigate),
            ),
            ("108", entry(C::Error, "XML no cumple el esquema vigente", R::CorrectAndResubmit)),
            ("109", entry(C::Error, "Firma digital inválida", R::CorrectAndResubmit)),
            (
                "110",
                entry(C::Error, "Certificado de firma vencido o revocado", R::Investigate),
            ),
            ("111", entry(C::Error, "Los totales del documento no cuadran", R::CorrectAndResubmit)),
            ("112", entry(C::Error, "Documento no encontrado", R::Investigate)),
            ("113", entry(C::Error, "Plazo de anulación vencido", R::Investigate)),
            (
                "114",
                entry(C::Error, "Fecha de emisión fuera del rango permitido", R::CorrectAndResubmit),
            ),
        ])
    }

    pub fn get(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.get(code.trim())
    }
}

/// Documents and references returned alongside a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseArtifacts {
    pub unique_document_code: Option<String>,
    pub alternate_document_code: Option<String>,
    pub fiscal_document_number: Option<String>,
    pub authorization_protocol: Option<String>,
    pub security_protocol: Option<String>,
    pub qr_url: Option<String>,
    pub qr_image_base64: Option<String>,
    pub pdf_base64: Option<String>,
}

impl ResponseArtifacts {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One authority exchange, classified. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedResponse {
    is_success: bool,
    category: ResponseCategory,
    response_code: String,
    raw_message: String,
    friendly_message: String,
    recovery: RecoveryAction,
    artifacts: ResponseArtifacts,
}

impl ClassifiedResponse {
    pub fn is_success(&self) -> bool {
        self.is_success
    }

    pub fn category(&self) -> ResponseCategory {
        self.category
    }

    pub fn response_code(&self) -> &str {
        &self.response_code
    }

    pub fn raw_message(&self) -> &str {
        &self.raw_message
    }

    pub fn friendly_message(&self) -> &str {
        &self.friendly_message
    }

    pub fn recovery(&self) -> RecoveryAction {
        self.recovery
    }

    pub fn artifacts(&self) -> &ResponseArtifacts {
        &self.artifacts
    }
}

/// # Examples
/// ```rust
/// use fel_core::classify::{ResponseArtifacts, ResponseCategory, ResponseClassifier};
///
/// let classifier = ResponseClassifier::default();
/// let response = classifier.classify("999", "Código nuevo", ResponseArtifacts::default());
/// assert_eq!(response.category(), ResponseCategory::Unknown);
/// assert!(!response.is_success());
/// assert_eq!(response.friendly_message(), "Código nuevo");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ResponseClassifier<'a> {
    catalog: &'a ResponseCatalog,
}

impl Default for ResponseClassifier<'static> {
    fn default() -> Self {
        Self::new(ResponseCatalog::standard())
    }
}

impl<'a> ResponseClassifier<'a> {
    pub fn new(catalog: &'a ResponseCatalog) -> Self {
        Self { catalog }
    }

    pub fn classify(
        &self,
        code: &str,
        message: &str,
        artifacts: ResponseArtifacts,
    ) -> ClassifiedResponse {
        let code = code.trim();
        let response = match self.catalog.get(code) {
            Some(entry) => ClassifiedResponse {
                is_success: entry.category == ResponseCategory::Success,
                category: entry.category,
                response_code: code.to_string(),
                raw_message: message.to_string(),
                friendly_message: entry.friendly_message.to_string(),
                recovery: entry.recovery,
                artifacts,
            },
            None => ClassifiedResponse {
                is_success: false,
                category: ResponseCategory::Unknown,
                response_code: code.to_string(),
                raw_message: message.to_string(),
                friendly_message: message.to_string(),
                recovery: ResponseCategory::Unknown.recovery(),
                artifacts,
            },
        };
        tracing::info!(
            code = %response.response_code,
            category = response.category.as_str(),
            "authority response classified"
        );
        response
    }

    pub fn is_success_code(&self, code: &str) -> bool {
        self.category_of(code) == Some(ResponseCategory::Success)
    }

    pub fn is_processing_code(&self, code: &str) -> bool {
        self.category_of(code) == Some(ResponseCategory::Processing)
    }

    pub fn is_error_code(&self, code: &str) -> bool {
        self.category_of(code) == Some(ResponseCategory::Error)
    }

    fn category_of(&self, code: &str) -> Option<ResponseCategory> {
        self.catalog.get(code).map(|entry| entry.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_success_code_is_success() {
        let artifacts = ResponseArtifacts {
            unique_document_code: Some("FE01200001".into()),
            ..Default::default()
        };
        let response = ResponseClassifier::default().classify(" 200 ", "OK", artifacts.clone());
        assert!(response.is_success());
        assert_eq!(response.category(), ResponseCategory::Success);
        assert_eq!(response.response_code(), "200");
        assert_eq!(response.raw_message(), "OK");
        assert_eq!(response.friendly_message(), "Documento autorizado por la DGI");
        assert_eq!(response.recovery(), RecoveryAction::None);
        assert_eq!(response.artifacts(), &artifacts);
    }

    #[test]
    fn unknown_code_passes_message_through() {
        let response =
            ResponseClassifier::default().classify("X42", "Error raro", ResponseArtifacts::default());
        assert!(!response.is_success());
        assert_eq!(response.category(), ResponseCategory::Unknown);
        assert_eq!(response.friendly_message(), "Error raro");
        assert_eq!(response.recovery(), RecoveryAction::Investigate);
    }

    #[test]
    fn predicates_follow_the_catalog() {
        let classifier = ResponseClassifier::default();
        for code in ["200", "201", "202"] {
            assert!(classifier.is_success_code(code), "{code}");
        }
        for code in ["100", "102", "103"] {
            assert!(classifier.is_processing_code(code), "{code}");
            assert!(!classifier.is_error_code(code), "{code}");
        }
        for code in 104..=114 {
            assert!(classifier.is_error_code(&code.to_string()), "{code}");
        }
        assert!(classifier.is_error_code("101"));
        assert!(!classifier.is_success_code("999"));
        assert!(!classifier.is_processing_code("999"));
        assert!(!classifier.is_error_code("999"));
    }

    #[test]
    fn duplicate_submission_recovers_by_polling() {
        let response =
            ResponseClassifier::default().classify("104", "Duplicado", ResponseArtifacts::default());
        assert_eq!(response.category(), ResponseCategory::Error);
        assert_eq!(response.recovery(), RecoveryAction::PollStatus);
    }

    #[test]
    fn custom_catalog_is_injected() {
        let catalog = ResponseCatalog::from_entries([(
            "0260",
            CatalogEntry {
                category: ResponseCategory::Success,
                friendly_message: "Autorizado",
                recovery: RecoveryAction::None,
            },
        )]);
        let classifier = ResponseClassifier::new(&catalog);
        assert!(classifier.is_success_code("0260"));
        assert!(!classifier.is_success_code("200"));
    }

    #[test]
    fn category_recovery_defaults() {
        assert_eq!(ResponseCategory::Processing.recovery(), RecoveryAction::PollStatus);
        assert_eq!(ResponseCategory::Error.recovery(), RecoveryAction::CorrectAndResubmit);
        assert!(ResponseArtifacts::default().is_empty());
    }
}
