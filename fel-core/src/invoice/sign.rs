use crate::certificate::{Certificate, CertificateError};
use crate::invoice::SignedDocument;
use crate::invoice::xml::constants::{
    DS_NS, ENVELOPED_SIGNATURE_TRANSFORM, EXC_C14N_ALGORITHM, RSA_SHA256_ALGORITHM,
    SHA256_DIGEST_ALGORITHM, SIGNATURE_TEMPLATE, SIGNED_INFO_TEMPLATE,
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use libxml::{
    parser::Parser,
    tree::Node,
    tree::{Document, c14n},
    xpath,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("malformed XML: {0}")]
    MalformedXml(String),
    #[error("certificate rejected: {0}")]
    Certificate(#[from] CertificateError),
    #[error("document already carries an enveloped signature")]
    AlreadySigned,
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
}

/// XMLDSig enveloped signer (exclusive C14N, SHA-256, RSA PKCS#1 v1.5).
///
/// # Examples
/// ```rust,no_run
/// use fel_core::certificate::Certificate;
/// use fel_core::invoice::sign::DocumentSigner;
///
/// let cert = Certificate::load("firma.p12", "secret".into()).unwrap();
/// let xml = std::fs::read_to_string("factura.xml").unwrap();
/// let signed = DocumentSigner::new().sign(&xml, &cert).unwrap();
/// assert!(DocumentSigner::new().verify(signed.xml(), &cert));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSigner;

impl DocumentSigner {
    pub fn new() -> Self {
        Self
    }

    pub fn sign(&self, xml: &str, cert: &Certificate) -> Result<SignedDocument, SigningError> {
        self.sign_at(xml, cert, Utc::now())
    }

    /// Sign `xml` checking the certificate validity window at `now`.
    pub fn sign_at(
        &self,
        xml: &str,
        cert: &Certificate,
        now: DateTime<Utc>,
    ) -> Result<SignedDocument, SigningError> {
        cert.check_validity_at(now)?;

        let mut doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::MalformedXml(format!("XML parse error: {e:?}")))?;
        let mut root = doc
            .get_root_element()
            .ok_or_else(|| SigningError::MalformedXml("missing root element".into()))?;
        if has_signature(&doc)? {
            return Err(SigningError::AlreadySigned);
        }

        let digest = document_digest_base64(&doc)?;
        tracing::debug!(digest = %digest, "document digest computed");

        let signed_info = signed_info_c14n(&digest)?;
        let signature_value = {
            let key = cert
                .unlock()
                .map_err(|e| SigningError::InvalidPrivateKey(e.to_string()))?;
            let raw = key
                .sign(signed_info.as_bytes())
                .map_err(|e| SigningError::InvalidPrivateKey(format!("RSA signing failed: {e}")))?;
            if !cert.verify_signature(signed_info.as_bytes(), &raw) {
                return Err(SigningError::InvalidCertificate(
                    "certificate public key does not verify the produced signature".into(),
                ));
            }
            Base64::encode_string(&raw)
        };

        let signature_xml = signature_fragment(&signature_value, cert)?;
        let mut signature_node = import_fragment(&mut doc, &signature_xml)?;
        root.add_child(&mut signature_node)
            .map_err(|e| SigningError::MalformedXml(e.to_string()))?;
        let mut signed_info_node = import_fragment(&mut doc, &signed_info)?;
        let mut first = first_element_child(&signature_node)
            .ok_or_else(|| SigningError::MalformedXml("empty signature template".into()))?;
        first
            .add_prev_sibling(&mut signed_info_node)
            .map_err(|e| SigningError::MalformedXml(e.to_string()))?;

        tracing::info!(fingerprint = %cert.fingerprint(), "document signed");
        Ok(SignedDocument::new(
            doc.to_string(),
            digest,
            signature_value,
            cert.fingerprint().to_string(),
        ))
    }

    /// Check the enveloped signature of `xml` against `cert`.
    ///
    /// Never fails: missing signatures, unexpected algorithms, digest
    /// mismatches and bad signature values all yield `false`.
    pub fn verify(&self, xml: &str, cert: &Certificate) -> bool {
        match verify_document(xml, cert) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::debug!(error = %e, "signature verification aborted");
                false
            }
        }
    }
}

/// Whether `xml` already carries an XMLDSig `Signature` element.
pub fn is_already_signed(xml: &str) -> bool {
    Parser::default()
        .parse_string(xml)
        .ok()
        .is_some_and(|doc| has_signature(&doc).unwrap_or(false))
}

fn verify_document(xml: &str, cert: &Certificate) -> Result<bool, SigningError> {
    let doc = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::MalformedXml(format!("XML parse error: {e:?}")))?;
    let ctx = ds_context(&doc)?;

    if evaluate(&ctx, "//ds:Signature")?.len() != 1 {
        return Ok(false);
    }
    let expected_algorithms = [
        ("//ds:Signature/ds:SignedInfo/ds:CanonicalizationMethod", EXC_C14N_ALGORITHM),
        ("//ds:Signature/ds:SignedInfo/ds:SignatureMethod", RSA_SHA256_ALGORITHM),
        ("//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestMethod", SHA256_DIGEST_ALGORITHM),
    ];
    for (path, algorithm) in expected_algorithms {
        if algorithm_of(&ctx, path)?.as_deref() != Some(algorithm) {
            return Ok(false);
        }
    }
    let transforms: Vec<Option<String>> = evaluate(
        &ctx,
        "//ds:Signature/ds:SignedInfo/ds:Reference/ds:Transforms/ds:Transform",
    )?
    .iter()
    .map(|node| node.get_attribute("Algorithm"))
    .collect();
    let expected_transforms = [
        Some(ENVELOPED_SIGNATURE_TRANSFORM.to_string()),
        Some(EXC_C14N_ALGORITHM.to_string()),
    ];
    if transforms != expected_transforms {
        return Ok(false);
    }
    let reference = evaluate(&ctx, "//ds:Signature/ds:SignedInfo/ds:Reference")?;
    if reference.len() != 1 || reference[0].get_attribute("URI").as_deref() != Some("") {
        return Ok(false);
    }

    let Some(claimed_digest) = text_of(&ctx, "//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestValue")?
    else {
        return Ok(false);
    };
    let Some(signature_b64) = text_of(&ctx, "//ds:Signature/ds:SignatureValue")? else {
        return Ok(false);
    };

    let unsigned = doc
        .dup()
        .map_err(|e| SigningError::MalformedXml(format!("Failed to duplicate xml: {e:?}")))?;
    for mut node in evaluate(&ds_context(&unsigned)?, "//ds:Signature")? {
        node.unlink();
    }
    if document_digest_base64(&unsigned)? != claimed_digest {
        tracing::debug!("digest mismatch");
        return Ok(false);
    }

    let compact: String = signature_b64.split_whitespace().collect();
    let Ok(signature) = Base64::decode_vec(&compact) else {
        return Ok(false);
    };
    let signed_info = signed_info_c14n(&claimed_digest)?;
    Ok(cert.verify_signature(signed_info.as_bytes(), &signature))
}

fn has_signature(doc: &Document) -> Result<bool, SigningError> {
    let ctx = ds_context(doc)?;
    Ok(!evaluate(&ctx, "//ds:Signature")?.is_empty())
}

/// Base64 SHA-256 of the exclusive canonical form of `doc`.
fn document_digest_base64(doc: &Document) -> Result<String, SigningError> {
    let canonical = canonicalize(doc)?;
    Ok(Base64::encode_string(&Sha256::digest(canonical.as_bytes())))
}

fn canonicalize(doc: &Document) -> Result<String, SigningError> {
    let canon_opts = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    doc.canonicalize(canon_opts, None)
        .map_err(|e| SigningError::Canonicalization(format!("{e:?}")))
}

// canonical SignedInfo carrying `digest`; these are the bytes that get signed
fn signed_info_c14n(digest: &str) -> Result<String, SigningError> {
    let template = Parser::default()
        .parse_string(SIGNED_INFO_TEMPLATE)
        .map_err(|e| SigningError::MalformedXml(format!("SignedInfo template: {e:?}")))?;
    let ctx = ds_context(&template)?;
    set_xpath_text(&ctx, "/ds:SignedInfo/ds:Reference/ds:DigestValue", digest)?;
    canonicalize(&template)
}

fn signature_fragment(signature_value: &str, cert: &Certificate) -> Result<String, SigningError> {
    let template = Parser::default()
        .parse_string(SIGNATURE_TEMPLATE)
        .map_err(|e| SigningError::MalformedXml(format!("Signature template: {e:?}")))?;
    let ctx = ds_context(&template)?;
    set_xpath_text(&ctx, "/ds:Signature/ds:SignatureValue", signature_value)?;
    set_xpath_text(
        &ctx,
        "/ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        &Base64::encode_string(cert.leaf_der()),
    )?;
    Ok(template.to_string())
}

fn ds_context(doc: &Document) -> Result<xpath::Context, SigningError> {
    let ctx = xpath::Context::new(doc)
        .map_err(|e| SigningError::MalformedXml(format!("XPath context error: {e:?}")))?;
    ctx.register_namespace("ds", DS_NS)
        .map_err(|e| SigningError::MalformedXml(format!("XPath context error: {e:?}")))?;
    Ok(ctx)
}

fn evaluate(ctx: &xpath::Context, path: &str) -> Result<Vec<Node>, SigningError> {
    Ok(ctx
        .evaluate(path)
        .map_err(|e| SigningError::MalformedXml(format!("XPath error for {path}: {e:?}")))?
        .get_nodes_as_vec())
}

fn algorithm_of(ctx: &xpath::Context, path: &str) -> Result<Option<String>, SigningError> {
    let nodes = evaluate(ctx, path)?;
    Ok(match nodes.as_slice() {
        [node] => node.get_attribute("Algorithm"),
        _ => None,
    })
}

fn text_of(ctx: &xpath::Context, path: &str) -> Result<Option<String>, SigningError> {
    let nodes = evaluate(ctx, path)?;
    Ok(nodes
        .first()
        .map(|node| node.get_content().trim().to_string())
        .filter(|value| !value.is_empty()))
}

fn set_xpath_text(ctx: &xpath::Context, path: &str, value: &str) -> Result<(), SigningError> {
    let nodes = evaluate(ctx, path)?;
    if nodes.is_empty() {
        return Err(SigningError::MalformedXml(format!(
            "XPath target not found: {path}"
        )));
    }
    for mut node in nodes {
        node.set_content(value)
            .map_err(|e| SigningError::MalformedXml(e.to_string()))?;
    }
    Ok(())
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::MalformedXml(format!("XML parse error: {e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::MalformedXml("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::MalformedXml("failed to import fragment".into()))
}

fn first_element_child(parent: &Node) -> Option<Node> {
    let mut current = parent.get_first_child();
    while let Some(node) = current {
        if node.is_element_node() {
            return Some(node);
        }
        current = node.get_next_sibling();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_info_carries_digest_and_algorithms() {
        let canonical = signed_info_c14n("ZGlnZXN0").expect("signed info");
        assert!(canonical.starts_with(
            "<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">"
        ));
        assert!(canonical.contains("<ds:DigestValue>ZGlnZXN0</ds:DigestValue>"));
        assert!(canonical.contains(RSA_SHA256_ALGORITHM));
        assert!(canonical.contains(ENVELOPED_SIGNATURE_TRANSFORM));
        // c14n expands empty elements
        assert!(canonical.contains("</ds:SignatureMethod>"));
    }

    #[test]
    fn digest_ignores_declaration_and_formatting_of_attributes() {
        let a = Parser::default()
            .parse_string("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rFE a=\"1\"  b='2'><x/></rFE>")
            .expect("parse a");
        let b = Parser::default()
            .parse_string("<rFE b=\"2\" a=\"1\"><x></x></rFE>")
            .expect("parse b");
        assert_eq!(
            document_digest_base64(&a).unwrap(),
            document_digest_base64(&b).unwrap()
        );
    }

    #[test]
    fn detects_existing_signature() {
        assert!(!is_already_signed("<rFE><dId>1</dId></rFE>"));
        assert!(is_already_signed(
            "<rFE><ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"/></rFE>"
        ));
        // same local name, other namespace
        assert!(!is_already_signed("<rFE><Signature/></rFE>"));
        assert!(!is_already_signed("<rFE"));
    }
}
