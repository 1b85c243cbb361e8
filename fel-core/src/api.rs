//! Certification service client.
pub mod envelope;

use base64ct::{Base64, Encoding};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::classify::ResponseArtifacts;
use crate::config::Config;
use crate::invoice::SignedDocument;
use envelope::{Envelope, EnvelopeCodec, EnvelopeError, SoapCodec};

const SERVICE_PATH: &str = "Service.svc";

const SUBMIT_OPERATION: &str = "Enviar";
const QUERY_OPERATION: &str = "EstadoDocumento";
const CANCEL_OPERATION: &str = "AnulacionDocumento";

/// Errors returned by the certification service client.
///
/// Business rejections are not errors: they arrive as an
/// [`AuthorityResponse`] and go through the classifier. After a
/// [`TransportError::Timeout`] the document may or may not have been
/// accepted, so query by unique code before resubmitting.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("SOAP fault {code}: {message}")]
    Fault { code: String, message: String },
    #[error("Malformed response from authority: {0}")]
    MalformedResponse(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Service account for the certification endpoint.
///
/// # Examples
/// ```rust
/// use fel_core::api::AuthorityCredentials;
///
/// let creds = AuthorityCredentials::new("empresa-demo", "s3cret".into());
/// assert_eq!(creds.username(), "empresa-demo");
/// assert!(!format!("{creds:?}").contains("s3cret"));
/// ```
#[derive(Debug)]
pub struct AuthorityCredentials {
    username: String,
    password: SecretString,
}

impl AuthorityCredentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Code, message and payload fields of one response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityResponse {
    operation: String,
    code: String,
    message: String,
    fields: Vec<(String, String)>,
}

impl AuthorityResponse {
    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError> {
        let code = envelope
            .field("codigo")
            .or_else(|| envelope.field("code"))
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                TransportError::MalformedResponse(format!(
                    "{} response carries no response code",
                    envelope.operation()
                ))
            })?
            .to_string();
        let message = envelope
            .field("mensaje")
            .or_else(|| envelope.field("message"))
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            operation: envelope.operation().to_string(),
            code,
            message,
            fields: envelope.fields().to_vec(),
        })
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Opaque authority code; interpret it through the classifier only.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Payload field by name, ignoring ASCII case. Empty values read as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }

    fn first_of(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| self.field(name))
            .map(|value| value.trim().to_string())
    }

    pub fn artifacts(&self) -> ResponseArtifacts {
        ResponseArtifacts {
            unique_document_code: self.first_of(&["cufe", "dId"]),
            alternate_document_code: self.first_of(&["codigoAlterno", "cufeAlterno"]),
            fiscal_document_number: self.first_of(&["numeroDocumentoFiscal", "dNroDF"]),
            authorization_protocol: self.first_of(&["nroProtocoloAutorizacion", "protocolo"]),
            security_protocol: self.first_of(&["protocoloSeguridad", "codigoSeguridad"]),
            qr_url: self.first_of(&["qr", "urlQr"]),
            qr_image_base64: self.first_of(&["qrImagen", "imagenQr"]),
            pdf_base64: self.first_of(&["pdf", "documentoPdf"]),
        }
    }
}

/// Certification service client.
///
/// # Examples
/// ```rust,no_run
/// use fel_core::api::AuthorityClient;
/// use fel_core::config::Config;
///
/// let client = AuthorityClient::new(Config::default())?;
/// # let _ = client;
/// # Ok::<(), fel_core::api::TransportError>(())
/// ```
#[derive(Debug)]
pub struct AuthorityClient<C = SoapCodec> {
    config: Config,
    client: Client,
    codec: C,
}

impl AuthorityClient<SoapCodec> {
    /// Create a client speaking SOAP to the configured environment.
    ///
    /// # Errors
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, TransportError> {
        Self::with_codec(config, SoapCodec)
    }
}

// Public API
impl<C: EnvelopeCodec> AuthorityClient<C> {
    pub fn with_codec(config: Config, codec: C) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            config,
            client,
            codec,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit a signed document for certification.
    ///
    /// The client does not deduplicate; a second submission of an accepted
    /// document comes back as an authority rejection.
    pub async fn submit(
        &self,
        document: &SignedDocument,
        credentials: &AuthorityCredentials,
    ) -> Result<AuthorityResponse, TransportError> {
        self.submit_xml(document.xml(), credentials).await
    }

    /// Submit already-signed XML read from storage.
    pub async fn submit_xml(
        &self,
        signed_xml: &str,
        credentials: &AuthorityCredentials,
    ) -> Result<AuthorityResponse, TransportError> {
        let envelope = self
            .request(SUBMIT_OPERATION, credentials)
            .with_field("documento", Base64::encode_string(signed_xml.as_bytes()));
        self.exchange(envelope).await
    }

    /// Look up the status of a document by its unique code.
    pub async fn query(
        &self,
        unique_code: &str,
        credentials: &AuthorityCredentials,
    ) -> Result<AuthorityResponse, TransportError> {
        let envelope = self
            .request(QUERY_OPERATION, credentials)
            .with_field("cufe", unique_code);
        self.exchange(envelope).await
    }

    pub async fn cancel(
        &self,
        unique_code: &str,
        reason: &str,
        credentials: &AuthorityCredentials,
    ) -> Result<AuthorityResponse, TransportError> {
        let envelope = self
            .request(CANCEL_OPERATION, credentials)
            .with_field("cufe", unique_code)
            .with_field("motivoAnulacion", reason);
        self.exchange(envelope).await
    }
}

// Private API
impl<C: EnvelopeCodec> AuthorityClient<C> {
    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path.trim_start_matches('/'))
    }

    fn request(&self, operation: &str, credentials: &AuthorityCredentials) -> Envelope {
        Envelope::new(operation, self.config.service_namespace())
            .with_field("tokenEmpresa", credentials.username())
            .with_field("tokenPassword", credentials.password())
    }

    async fn exchange(&self, envelope: Envelope) -> Result<AuthorityResponse, TransportError> {
        let body = self
            .codec
            .encode(&envelope)
            .map_err(|e| TransportError::MalformedResponse(format!("request encoding: {e}")))?;
        let url = self.build_endpoint(SERVICE_PATH);
        tracing::info!(operation = envelope.operation(), %url, "sending request to authority");

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", self.codec.content_type())
            .body(body);
        if let Some(action) = self.codec.action(&envelope) {
            request = request.header("SOAPAction", format!("\"{action}\""));
        }

        let response = request.send().await.map_err(|e| self.send_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.send_error(e))?;

        match self.codec.decode(&text) {
            Err(EnvelopeError::Fault { code, message }) => {
                tracing::warn!(%code, "authority returned a fault");
                Err(TransportError::Fault { code, message })
            }
            Err(e) => Err(TransportError::MalformedResponse(format!(
                "status {status}: {e}"
            ))),
            Ok(_) if !status.is_success() => Err(TransportError::MalformedResponse(format!(
                "status {status}: {text}"
            ))),
            Ok(decoded) => {
                let parsed = AuthorityResponse::from_envelope(decoded)?;
                tracing::info!(
                    operation = parsed.operation(),
                    code = parsed.code(),
                    "authority responded"
                );
                Ok(parsed)
            }
        }
    }

    fn send_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.config.request_timeout())
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentType;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    const ENVIAR_OK: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <EnviarResponse xmlns="http://tempuri.org/">
      <EnviarResult>
        <codigo>200</codigo>
        <resultado>procesado</resultado>
        <mensaje>Autorizado el uso de la FE</mensaje>
        <cufe>FE01200000155596713-2-2015-590000202503010000000001001012000000001</cufe>
        <qr>https://dgi-fep.mef.gob.pa/Consultas/FacturasPorQR?chFE=FE0120</qr>
        <nroProtocoloAutorizacion>2025000012345</nroProtocoloAutorizacion>
        <pdf></pdf>
      </EnviarResult>
    </EnviarResponse>
  </s:Body>
</s:Envelope>"#;

    fn try_start_server() -> Option<MockServer> {
        std::panic::catch_unwind(MockServer::start).ok()
    }

    fn config_for(server: &MockServer) -> Config {
        Config::new(EnvironmentType::Sandbox).with_base_url(server.base_url())
    }

    fn credentials() -> AuthorityCredentials {
        AuthorityCredentials::new("empresa", "clave".into())
    }

    #[test]
    fn response_requires_code() {
        let envelope = Envelope::new("EnviarResponse", "").with_field("mensaje", "hola");
        assert!(matches!(
            AuthorityResponse::from_envelope(envelope),
            Err(TransportError::MalformedResponse(_))
        ));
    }

    #[test]
    fn artifacts_skip_empty_fields() {
        let envelope = SoapCodec.decode(ENVIAR_OK).expect("decode");
        let response = AuthorityResponse::from_envelope(envelope).expect("response");
        let artifacts = response.artifacts();
        assert_eq!(response.code(), "200");
        assert_eq!(response.message(), "Autorizado el uso de la FE");
        assert!(artifacts.unique_document_code.as_deref().unwrap().starts_with("FE012"));
        assert_eq!(
            artifacts.authorization_protocol.as_deref(),
            Some("2025000012345")
        );
        assert!(artifacts.qr_url.is_some());
        assert_eq!(artifacts.pdf_base64, None);
    }

    #[test]
    fn submit_posts_soap_envelope() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        let encoded = Base64::encode_string(b"<rFE/>");
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/Service.svc")
                .header("content-type", "text/xml; charset=utf-8")
                .header("soapaction", "\"http://tempuri.org/Enviar\"")
                .body_contains("<tokenEmpresa>empresa</tokenEmpresa>")
                .body_contains("<tokenPassword>clave</tokenPassword>")
                .body_contains(format!("<documento>{encoded}</documento>"));
            then.status(200)
                .header("content-type", "text/xml; charset=utf-8")
                .body(ENVIAR_OK);
        });

        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let client = AuthorityClient::new(config_for(&server)).expect("client");
            let response = client
                .submit_xml("<rFE/>", &credentials())
                .await
                .expect("submit");
            assert_eq!(response.operation(), "EnviarResponse");
            assert_eq!(response.code(), "200");
            mock.assert();
        });
    }

    #[test]
    fn query_and_cancel_use_their_operations() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        let query_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/Service.svc")
                .header("soapaction", "\"http://tempuri.org/EstadoDocumento\"")
                .body_contains("<cufe>FE0123</cufe>");
            then.status(200).body(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><EstadoDocumentoResponse xmlns="http://tempuri.org/"><EstadoDocumentoResult><codigo>100</codigo><mensaje>En proceso</mensaje></EstadoDocumentoResult></EstadoDocumentoResponse></s:Body></s:Envelope>"#,
            );
        });
        let cancel_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/Service.svc")
                .header("soapaction", "\"http://tempuri.org/AnulacionDocumento\"")
                .body_contains("<motivoAnulacion>Error en monto</motivoAnulacion>");
            then.status(200).body(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><AnulacionDocumentoResponse xmlns="http://tempuri.org/"><AnulacionDocumentoResult><codigo>201</codigo><mensaje>Anulado</mensaje></AnulacionDocumentoResult></AnulacionDocumentoResponse></s:Body></s:Envelope>"#,
            );
        });

        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let client = AuthorityClient::new(config_for(&server)).expect("client");
            let status = client.query("FE0123", &credentials()).await.expect("query");
            assert_eq!(status.code(), "100");
            let cancelled = client
                .cancel("FE0123", "Error en monto", &credentials())
                .await
                .expect("cancel");
            assert_eq!(cancelled.code(), "201");
            query_mock.assert();
            cancel_mock.assert();
        });
    }

    #[test]
    fn soap_fault_is_a_transport_error() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        server.mock(|when, then| {
            when.method(POST).path("/Service.svc");
            then.status(500).body(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode><faultstring>Servicio no disponible</faultstring></s:Fault></s:Body></s:Envelope>"#,
            );
        });

        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let client = AuthorityClient::new(config_for(&server)).expect("client");
            let err = client.query("FE0123", &credentials()).await.unwrap_err();
            match err {
                TransportError::Fault { code, message } => {
                    assert_eq!(code, "s:Server");
                    assert_eq!(message, "Servicio no disponible");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        });
    }

    #[test]
    fn non_envelope_body_is_malformed() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        server.mock(|when, then| {
            when.method(POST).path("/Service.svc");
            then.status(502).body("Bad gateway");
        });

        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let client = AuthorityClient::new(config_for(&server)).expect("client");
            let err = client.query("FE0123", &credentials()).await.unwrap_err();
            assert!(matches!(err, TransportError::MalformedResponse(_)));
        });
    }

    #[test]
    fn slow_authority_times_out() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        server.mock(|when, then| {
            when.method(POST).path("/Service.svc");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .body(ENVIAR_OK);
        });

        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let config = config_for(&server).with_timeout(Duration::from_millis(200));
            let client = AuthorityClient::new(config).expect("client");
            let err = client.submit_xml("<rFE/>", &credentials()).await.unwrap_err();
            assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_millis(200)));
        });
    }
}
