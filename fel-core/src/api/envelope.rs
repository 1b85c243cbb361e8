//! Request/response envelopes for the certification service.
//!
//! [`Envelope`] is a plain value: an operation name, its namespace and an
//! ordered list of leaf fields. Codecs turn it into wire bytes and back.
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope XML error: {0}")]
    Xml(String),
    #[error("envelope has no body")]
    MissingBody,
    #[error("envelope body is empty")]
    MissingOperation,
    #[error("SOAP fault {code}: {message}")]
    Fault { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    operation: String,
    namespace: String,
    fields: Vec<(String, String)>,
}

impl Envelope {
    pub fn new(operation: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            namespace: namespace.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First field named `name`, ignoring ASCII case.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Wire format for envelopes.
pub trait EnvelopeCodec: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// Value of the action header for `envelope`, if the format uses one.
    fn action(&self, _envelope: &Envelope) -> Option<String> {
        None
    }

    fn encode(&self, envelope: &Envelope) -> Result<String, EnvelopeError>;

    /// Decode a response. Faults surface as [`EnvelopeError::Fault`].
    fn decode(&self, body: &str) -> Result<Envelope, EnvelopeError>;
}

/// SOAP 1.1 codec built on quick-xml.
///
/// # Examples
/// ```rust
/// use fel_core::api::envelope::{Envelope, EnvelopeCodec, SoapCodec};
///
/// let request = Envelope::new("EstadoDocumento", "http://tempuri.org/")
///     .with_field("cufe", "FE0120000155596713-2-2015");
/// let xml = SoapCodec.encode(&request).unwrap();
/// assert!(xml.contains("<EstadoDocumento xmlns=\"http://tempuri.org/\">"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SoapCodec;

impl EnvelopeCodec for SoapCodec {
    fn content_type(&self) -> &'static str {
        "text/xml; charset=utf-8"
    }

    fn action(&self, envelope: &Envelope) -> Option<String> {
        Some(format!("{}{}", envelope.namespace, envelope.operation))
    }

    fn encode(&self, envelope: &Envelope) -> Result<String, EnvelopeError> {
        let mut writer = Writer::new(Vec::new());
        write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut root = BytesStart::new("soap:Envelope");
        root.push_attribute(("xmlns:soap", SOAP_ENVELOPE_NS));
        write(&mut writer, Event::Start(root))?;
        write(&mut writer, Event::Start(BytesStart::new("soap:Body")))?;

        let mut operation = BytesStart::new(envelope.operation.as_str());
        operation.push_attribute(("xmlns", envelope.namespace.as_str()));
        write(&mut writer, Event::Start(operation))?;
        for (name, value) in &envelope.fields {
            write(&mut writer, Event::Start(BytesStart::new(name.as_str())))?;
            write(&mut writer, Event::Text(BytesText::new(value)))?;
            write(&mut writer, Event::End(BytesEnd::new(name.as_str())))?;
        }
        write(&mut writer, Event::End(BytesEnd::new(envelope.operation.as_str())))?;

        write(&mut writer, Event::End(BytesEnd::new("soap:Body")))?;
        write(&mut writer, Event::End(BytesEnd::new("soap:Envelope")))?;

        String::from_utf8(writer.into_inner()).map_err(|e| EnvelopeError::Xml(e.to_string()))
    }

    fn decode(&self, body: &str) -> Result<Envelope, EnvelopeError> {
        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut body_depth = None;
        let mut envelope: Option<Envelope> = None;
        let mut open_leaf: Option<String> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| EnvelopeError::Xml(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    depth += 1;
                    let name = local_name(start.local_name().as_ref())?;
                    match (body_depth, envelope.as_ref()) {
                        (None, _) if name == "Body" => body_depth = Some(depth),
                        (Some(body), None) if depth == body + 1 => {
                            envelope = Some(Envelope::new(name, namespace_of(&start)));
                        }
                        (Some(_), Some(_)) => open_leaf = Some(name),
                        _ => {}
                    }
                }
                Event::Empty(start) => {
                    let name = local_name(start.local_name().as_ref())?;
                    match (body_depth, envelope.as_mut()) {
                        (None, _) if name == "Body" => return Err(EnvelopeError::MissingOperation),
                        (Some(body), None) if depth == body => {
                            envelope = Some(Envelope::new(name, namespace_of(&start)));
                        }
                        (Some(_), Some(envelope)) => envelope.push_field(name, ""),
                        _ => {}
                    }
                    open_leaf = None;
                }
                Event::Text(text) => {
                    if let (Some(name), Some(envelope)) = (open_leaf.take(), envelope.as_mut()) {
                        let value = text.unescape().map_err(|e| EnvelopeError::Xml(e.to_string()))?;
                        envelope.push_field(name, value.into_owned());
                    }
                }
                Event::CData(data) => {
                    if let (Some(name), Some(envelope)) = (open_leaf.take(), envelope.as_mut()) {
                        let value = std::str::from_utf8(&data)
                            .map_err(|e| EnvelopeError::Xml(e.to_string()))?;
                        envelope.push_field(name, value);
                    }
                }
                Event::End(end) => {
                    let name = local_name(end.local_name().as_ref())?;
                    if let (Some(leaf), Some(envelope)) = (open_leaf.take(), envelope.as_mut()) {
                        if leaf == name {
                            envelope.push_field(leaf, "");
                        }
                    }
                    if body_depth == Some(depth) {
                        break;
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if body_depth.is_none() {
            return Err(EnvelopeError::MissingBody);
        }
        let envelope = envelope.ok_or(EnvelopeError::MissingOperation)?;
        if envelope.operation == "Fault" {
            return Err(EnvelopeError::Fault {
                code: envelope.field("faultcode").unwrap_or_default().to_string(),
                message: envelope.field("faultstring").unwrap_or_default().to_string(),
            });
        }
        Ok(envelope)
    }
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), EnvelopeError> {
    writer
        .write_event(event)
        .map_err(|e| EnvelopeError::Xml(e.to_string()))
}

fn local_name(bytes: &[u8]) -> Result<String, EnvelopeError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| EnvelopeError::Xml(e.to_string()))
}

fn namespace_of(start: &BytesStart<'_>) -> String {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"xmlns")
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
        .unwrap_or_default()
}
