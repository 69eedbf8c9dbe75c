//! Bank identification for Dutch IBANs and BIC format checks
//!
//! Only the closed table below is consulted locally. Anything it does not
//! know is "unknown", not an error; callers fall back to an external
//! directory (see [`crate::authority::BankDirectory`]).
use super::iban::ValidIban;

struct DutchBank {
    code: &'static str,
    bic: &'static str,
    name: &'static str,
}

const fn bank(code: &'static str, bic: &'static str, name: &'static str) -> DutchBank {
    DutchBank { code, bic, name }
}

const DUTCH_BANKS: &[DutchBank] = &[
    bank("ABNA", "ABNANL2A", "ABN AMRO"),
    bank("INGB", "INGBNL2A", "ING"),
    bank("RABO", "RABONL2U", "Rabobank"),
    bank("TRIO", "TRIONL2U", "Triodos Bank"),
    bank("SNSB", "SNSBNL2A", "SNS Bank"),
    bank("ASNB", "ASNBNL21", "ASN Bank"),
    bank("KNAB", "KNABNL2H", "Knab"),
    bank("BUNQ", "BUNQNL2A", "bunq"),
    bank("RBRB", "RBRBNL21", "RegioBank"),
    bank("FVLB", "FVLBNL22", "Van Lanschot"),
];

/// Bank details resolved either locally or through the external directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    pub bic: Option<String>,
    pub name: Option<String>,
}

fn lookup(iban: &ValidIban) -> Option<&'static DutchBank> {
    if iban.country_code() != "NL" {
        return None;
    }
    let code = iban.bank_code();
    DUTCH_BANKS.iter().find(|bank| bank.code == code)
}

/// Derives the BIC for Dutch IBANs of known banks.
pub fn derive_bic(iban: &ValidIban) -> Option<&'static str> {
    lookup(iban).map(|bank| bank.bic)
}

/// Display name of the bank, for user feedback only.
pub fn bank_name(iban: &ValidIban) -> Option<&'static str> {
    lookup(iban).map(|bank| bank.name)
}

pub fn local_bank_info(iban: &ValidIban) -> Option<BankInfo> {
    lookup(iban).map(|bank| BankInfo {
        bic: Some(bank.bic.to_string()),
        name: Some(bank.name.to_string()),
    })
}

/// Checks the ISO 9362 shape: four letter bank code, two letter country,
/// two alphanumeric location characters and an optional three character
/// branch. Returns the normalised BIC.
pub fn validate_bic(raw: &str) -> Option<String> {
    let bic = super::iban::normalize(raw);
    let bytes = bic.as_bytes();

    let shape_ok = (bytes.len() == 8 || bytes.len() == 11)
        && bytes[..6].iter().all(u8::is_ascii_uppercase)
        && bytes[6..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

    shape_ok.then_some(bic)
}
