mod common;

use fel_core::api::{AuthorityClient, AuthorityCredentials, TransportError};
use fel_core::certificate::CertificateError;
use fel_core::classify::{RecoveryAction, ResponseCategory};
use fel_core::config::{Config, EnvironmentType};
use fel_core::invoice::FormatError;
use fel_core::invoice::sign::DocumentSigner;
use fel_core::invoice::validation::StructuralValidator;
use fel_core::pipeline::{CertificationPipeline, PipelineError, PipelineOptions};
use httpmock::{Method::POST, MockServer};

fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}

fn credentials() -> AuthorityCredentials {
    AuthorityCredentials::new("empresa-demo", "clave".into())
}

fn soap_response(operation: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><{operation}Response xmlns="http://tempuri.org/"><{operation}Result>{body}</{operation}Result></{operation}Response></s:Body></s:Envelope>"#
    )
}

#[test]
fn prepare_produces_verifiable_signed_document() {
    let cert = common::load_cert("valid.p12");
    let pipeline = CertificationPipeline::new(Config::new(EnvironmentType::Sandbox), &cert);
    let prepared = pipeline
        .prepare_at(&common::sample_raw_invoice(), common::signing_time())
        .expect("prepare");

    assert!(prepared.report().is_valid, "{:?}", prepared.report().errors);
    assert!(prepared.unique_code().starts_with("FE01"));
    assert!(prepared.candidate().critical_fields().is_empty());

    let signed = prepared.signed();
    assert!(DocumentSigner::new().verify(signed.xml(), &cert));
    assert!(signed.xml().contains("<iAmb>2</iAmb>"));
    assert!(signed.xml().contains("<dCantCodInt>1.0000</dCantCodInt>"));
    assert!(signed.xml().contains("<dPrUnit>26.724547</dPrUnit>"));
    assert!(signed.xml().contains("<dPrItem>26.52</dPrItem>"));
    assert!(signed.xml().contains(&format!("<dId>{}</dId>", prepared.unique_code())));
}

#[test]
fn environment_comes_from_config() {
    let cert = common::load_cert("valid.p12");
    let mut raw = common::sample_raw_invoice();
    raw.header.insert("iamb", 2);
    let pipeline = CertificationPipeline::new(Config::new(EnvironmentType::Production), &cert);
    let prepared = pipeline
        .prepare_at(&raw, common::signing_time())
        .expect("prepare");
    assert!(prepared.signed().xml().contains("<iAmb>1</iAmb>"));
}

#[test]
fn expired_certificate_stops_before_normalization() {
    let cert = common::load_cert("expired.p12");
    let pipeline = CertificationPipeline::new(Config::default(), &cert);
    let mut raw = common::sample_raw_invoice();
    raw.items.clear();
    let err = pipeline
        .prepare_at(&raw, common::signing_time())
        .expect_err("expired certificate");
    assert!(
        matches!(err, PipelineError::Certificate(CertificateError::Expired { .. })),
        "{err:?}"
    );
}

#[test]
fn certificate_owner_must_match_issuer() {
    let cert = common::load_cert("other.p12");
    let pipeline = CertificationPipeline::new(Config::default(), &cert);
    let err = pipeline
        .prepare_at(&common::sample_raw_invoice(), common::signing_time())
        .expect_err("foreign certificate");
    match err {
        PipelineError::Certificate(CertificateError::TaxIdMismatch { expected, found }) => {
            assert_eq!(expected, common::ISSUER_RUC);
            assert_eq!(found.as_deref(), Some("8-442-445"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let relaxed = CertificationPipeline::new(Config::default(), &cert).with_options(
        PipelineOptions {
            require_tax_id_match: false,
            ..PipelineOptions::default()
        },
    );
    assert!(
        relaxed
            .prepare_at(&common::sample_raw_invoice(), common::signing_time())
            .is_ok()
    );
}

#[test]
fn empty_item_list_is_a_format_error() {
    let cert = common::load_cert("valid.p12");
    let mut raw = common::sample_raw_invoice();
    raw.items.clear();
    let err = CertificationPipeline::new(Config::default(), &cert)
        .prepare_at(&raw, common::signing_time())
        .expect_err("no items");
    assert!(
        matches!(
            err,
            PipelineError::Format(FormatError::MissingField { field: "items" })
        ),
        "{err:?}"
    );
}

#[test]
fn validation_errors_block_signing() {
    let cert = common::load_cert("valid.p12");
    let strict = || StructuralValidator::with_required_fields(&["dVerForm", "gTot/dTotAjuste"]);

    let err = CertificationPipeline::new(Config::default(), &cert)
        .with_validator(strict())
        .prepare_at(&common::sample_raw_invoice(), common::signing_time())
        .expect_err("validation must block");
    match err {
        PipelineError::Validation(report) => {
            assert!(!report.is_valid);
            assert_eq!(report.errors, vec!["Missing required field gTot/dTotAjuste".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let prepared = CertificationPipeline::new(Config::default(), &cert)
        .with_validator(strict())
        .with_options(PipelineOptions {
            block_on_validation_errors: false,
            ..PipelineOptions::default()
        })
        .prepare_at(&common::sample_raw_invoice(), common::signing_time())
        .expect("advisory validation");
    assert!(!prepared.report().is_valid);
    assert!(DocumentSigner::new().verify(prepared.signed().xml(), &cert));
}

#[test]
fn placeholders_never_reach_the_xml() {
    let cert = common::load_cert("valid.p12");
    let mut raw = common::sample_raw_invoice();
    raw.customer.insert("razon_social", "undefined");
    let prepared = CertificationPipeline::new(Config::default(), &cert)
        .prepare_at(&raw, common::signing_time())
        .expect("prepare");
    assert!(prepared.signed().xml().contains("<dNombRec>CUSTOMER</dNombRec>"));
    assert!(prepared.report().critical_fields.is_empty());
}

#[test]
fn submit_is_classified() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/Service.svc")
            .header("soapaction", "\"http://tempuri.org/Enviar\"")
            .body_contains("<tokenEmpresa>empresa-demo</tokenEmpresa>");
        then.status(200).body(soap_response(
            "Enviar",
            "<codigo>200</codigo><mensaje>Autorizado el uso de la FE</mensaje><cufe>FE0120000155596713</cufe><nroProtocoloAutorizacion>2025000012345</nroProtocoloAutorizacion>",
        ));
    });

    let cert = common::load_cert("valid.p12");
    let config = Config::new(EnvironmentType::Sandbox).with_base_url(server.base_url());
    let pipeline = CertificationPipeline::new(config.clone(), &cert);
    let prepared = pipeline
        .prepare_at(&common::sample_raw_invoice(), common::signing_time())
        .expect("prepare");

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = AuthorityClient::new(config).expect("client");
        let classified = pipeline
            .submit(&client, prepared.signed(), &credentials())
            .await
            .expect("submit");
        assert!(classified.is_success());
        assert_eq!(classified.category(), ResponseCategory::Success);
        assert_eq!(classified.raw_message(), "Autorizado el uso de la FE");
        assert_eq!(
            classified.artifacts().authorization_protocol.as_deref(),
            Some("2025000012345")
        );
        mock.assert();
    });
}

#[test]
fn processing_response_recommends_polling() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/Service.svc")
            .header("soapaction", "\"http://tempuri.org/EstadoDocumento\"");
        then.status(200).body(soap_response(
            "EstadoDocumento",
            "<codigo>100</codigo><mensaje>En proceso</mensaje>",
        ));
    });

    let cert = common::load_cert("valid.p12");
    let config = Config::new(EnvironmentType::Sandbox).with_base_url(server.base_url());
    let pipeline = CertificationPipeline::new(config.clone(), &cert);

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = AuthorityClient::new(config).expect("client");
        let classified = pipeline
            .query(&client, "FE0123", &credentials())
            .await
            .expect("query");
        assert!(!classified.is_success());
        assert_eq!(classified.category(), ResponseCategory::Processing);
        assert_eq!(classified.recovery(), RecoveryAction::PollStatus);
        mock.assert();
    });
}

#[test]
fn fault_surfaces_as_transport_error() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path("/Service.svc");
        then.status(500).body(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>Token inválido</faultstring></s:Fault></s:Body></s:Envelope>"#,
        );
    });

    let cert = common::load_cert("valid.p12");
    let config = Config::new(EnvironmentType::Sandbox).with_base_url(server.base_url());
    let pipeline = CertificationPipeline::new(config.clone(), &cert);

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = AuthorityClient::new(config).expect("client");
        let err = pipeline
            .cancel(&client, "FE0123", "Error en monto", &credentials())
            .await
            .expect_err("fault");
        match err {
            PipelineError::Transport(TransportError::Fault { code, message }) => {
                assert_eq!(code, "s:Client");
                assert_eq!(message, "Token inválido");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    });
}
