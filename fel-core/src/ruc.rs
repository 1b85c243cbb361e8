//! RUC (Registro Único de Contribuyente) check digit arithmetic.
//!
//! The check digit is a weighted modulus-11 sum over the digits of the RUC.
//! Juridical RUCs written as `base-type-year` (a folio of five or more digits,
//! a one- or two-digit type and a four-digit year) leave the registration year
//! out of the sum.
//!
//! # Examples
//! ```rust
//! use fel_core::ruc::{compute_check_digit, is_valid_full_ruc};
//!
//! let dv = compute_check_digit("8-442-445")?;
//! assert!(is_valid_full_ruc(&format!("8-442-445-{dv}")));
//! # Ok::<(), fel_core::ruc::RucError>(())
//! ```
use thiserror::Error;

const WEIGHTS: [u32; 6] = [2, 3, 4, 5, 6, 7];
const JURIDICAL_BASE_MIN_LEN: usize = 5;

/// RUC parsing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RucError {
    #[error("invalid RUC format: {input:?}")]
    InvalidFormat { input: String },
}

/// Compute the check digit (DV) for a RUC written without its digit.
///
/// # Errors
/// Returns [`RucError::InvalidFormat`] when the input has no digits or contains
/// anything other than digits and the separators `-`, space and `.`.
pub fn compute_check_digit(ruc: &str) -> Result<String, RucError> {
    let digits = significant_digits(ruc)?;

    let sum: u32 = digits
        .iter()
        .rev()
        .zip(WEIGHTS.iter().cycle())
        .map(|(digit, weight)| digit * weight)
        .sum();
    let remainder = sum % 11;
    let dv = if remainder < 2 { 0 } else { 11 - remainder };
    Ok(dv.to_string())
}

/// Check a RUC whose last dash-separated segment is the check digit.
///
/// The digit segment must be one or two digits and is compared as an exact
/// string against the computed digit, so `07` never matches `7`.
pub fn is_valid_full_ruc(ruc: &str) -> bool {
    let Some((base, dv)) = ruc.trim().rsplit_once('-') else {
        return false;
    };
    if dv.is_empty() || dv.len() > 2 || !dv.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    compute_check_digit(base).is_ok_and(|expected| expected == dv)
}

/// Taxpayer type inferred from the RUC shape: `2` (juridical) for the
/// `base-type-year` form, `1` (natural person) otherwise.
pub fn taxpayer_type(ruc: &str) -> u8 {
    if year_segment(ruc).is_some() { 2 } else { 1 }
}

fn significant_digits(ruc: &str) -> Result<Vec<u32>, RucError> {
    let trimmed = ruc.trim();
    let body = match year_segment(trimmed) {
        Some(year_start) => &trimmed[..year_start],
        None => trimmed,
    };

    let mut digits = Vec::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '-' | ' ' | '.' => continue,
            _ => match ch.to_digit(10) {
                Some(d) => digits.push(d),
                None => {
                    return Err(RucError::InvalidFormat {
                        input: ruc.to_string(),
                    });
                }
            },
        }
    }
    if digits.is_empty() {
        return Err(RucError::InvalidFormat {
            input: ruc.to_string(),
        });
    }
    Ok(digits)
}

// byte offset of the `-YYYY` suffix when the input is `base-type-year`.
// Cédulas such as `8-123-1234` share the shape, so the base must be a
// registry folio (five digits or more) and the type one or two digits.
fn year_segment(ruc: &str) -> Option<usize> {
    let trimmed = ruc.trim();
    let segments: Vec<&str> = trimmed.split('-').collect();
    let [base, kind, year] = *segments.as_slice() else {
        return None;
    };
    let juridical = base.len() >= JURIDICAL_BASE_MIN_LEN
        && numeric(base)
        && (1..=2).contains(&kind.len())
        && numeric(kind)
        && year.len() == 4
        && numeric(year);
    juridical.then(|| trimmed.len() - year.len() - 1)
}

fn numeric(segment: &str) -> bool {
    segment.bytes().all(|b| b.is_ascii_digit())
}
