use chrono::{DateTime, TimeZone, Utc};
use fel_core::certificate::Certificate;
use fel_core::invoice::raw::RawRecord;
use fel_core::pipeline::RawInvoice;
use std::path::PathBuf;

#[allow(dead_code)]
pub const PASSPHRASE: &str = "fel-test";

#[allow(dead_code)]
pub const ISSUER_RUC: &str = "155596713-2-2015";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("certs")
        .join(name)
}

#[allow(dead_code)]
pub fn load_cert(name: &str) -> Certificate {
    Certificate::load(fixture_path(name), PASSPHRASE.into()).expect("load certificate fixture")
}

/// Inside the validity window of `valid.p12` and `other.p12`.
#[allow(dead_code)]
pub fn signing_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn sample_item() -> RawRecord {
    RawRecord::new()
        .with("DESCRIPCION", "Servicio de consultoría")
        .with("CANTIDAD", 0.0)
        .with("PRECIO_UNITARIO", 26.7245471)
        .with("PRECIO_ITEM", 26.52)
        .with("TASA_ITBMS", "7")
}

#[allow(dead_code)]
pub fn sample_raw_invoice() -> RawInvoice {
    RawInvoice {
        header: RawRecord::new()
            .with("numero_documento", 42)
            .with("fecha_emision", "2025-03-10T09:30:00-05:00")
            .with("punto_facturacion", "1")
            .with("forma_pago", "efectivo"),
        issuer: RawRecord::new()
            .with("ruc", ISSUER_RUC)
            .with("razon_social", "EMPRESA DEMO S.A.")
            .with("direccion", "Calle 50, Ciudad de Panamá")
            .with("codigo_ubicacion", "8-8-7")
            .with("sucursal", "1"),
        customer: RawRecord::new()
            .with("numero_ruc", "8-442-445")
            .with("razon_social", "Cliente Final")
            .with("codigo_ubicacion", "8-8-8")
            .with("tipo_cliente_fe", "2"),
        items: vec![
            sample_item(),
            RawRecord::new()
                .with("descripcion", "Soporte técnico")
                .with("cantidad", 2)
                .with("precio_unitario", "5.00")
                .with("tasa_itbms", 0),
        ],
    }
}
