//! IBAN validation per ISO 13616 with the MOD-97 (ISO 7064) check
//!
//! The algorithm is reproduced step for step so results agree with any
//! server-side counterpart:
//!
//! 1. strip whitespace and uppercase
//! 2. only `[A-Z0-9]` may remain
//! 3. shape must be two letters, two digits, then alphanumerics
//! 4. the country code must be in the closed length table
//! 5. the length must match the table entry
//! 6. MOD-97 over the rearranged digit string must leave 1
use super::error::IbanError;

/// Registered IBAN lengths, kept in sync with the ISO 13616 registry for the
/// SEPA zone.
const IBAN_LENGTHS: &[(&str, usize)] = &[
    ("AD", 24),
    ("AT", 20),
    ("BE", 16),
    ("BG", 22),
    ("CH", 21),
    ("CY", 28),
    ("CZ", 24),
    ("DE", 22),
    ("DK", 18),
    ("EE", 20),
    ("ES", 24),
    ("FI", 18),
    ("FO", 18),
    ("FR", 27),
    ("GB", 22),
    ("GI", 23),
    ("GL", 18),
    ("GR", 27),
    ("HR", 21),
    ("HU", 28),
    ("IE", 22),
    ("IS", 26),
    ("IT", 27),
    ("LI", 21),
    ("LT", 20),
    ("LU", 20),
    ("LV", 21),
    ("MC", 27),
    ("MT", 31),
    ("NL", 18),
    ("NO", 15),
    ("PL", 28),
    ("PT", 25),
    ("RO", 24),
    ("SE", 24),
    ("SI", 19),
    ("SK", 24),
    ("SM", 27),
    ("VA", 22),
];

// digits handled per MOD-97 step
const CHUNK_DIGITS: usize = 9;

/// An IBAN that passed every check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidIban {
    electronic: String,
    formatted: String,
    country_code: String,
}

impl ValidIban {
    /// Uppercase form without spaces, as stored on a mandate.
    pub fn electronic(&self) -> &str {
        &self.electronic
    }
    /// Canonical display form, blocks of four separated by single spaces.
    pub fn formatted(&self) -> &str {
        &self.formatted
    }
    pub fn country_code(&self) -> &str {
        &self.country_code
    }
    /// The four characters following the check digits. For Dutch IBANs this
    /// is the bank code.
    pub fn bank_code(&self) -> &str {
        &self.electronic[4..8]
    }
}

/// Strips all whitespace and uppercases.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Regroups into blocks of four. Any whitespace in the input is ignored, so
/// formatting an already formatted value is a no-op.
pub fn format_iban(raw: &str) -> String {
    let electronic = normalize(raw);
    let mut out = String::with_capacity(electronic.len() + electronic.len() / 4);

    for (i, c) in electronic.chars().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// Expected length for a country code, `None` for countries outside the table.
pub fn expected_length(country_code: &str) -> Option<usize> {
    IBAN_LENGTHS
        .iter()
        .find(|(code, _)| *code == country_code)
        .map(|(_, len)| *len)
}

pub fn supported_countries() -> impl Iterator<Item = &'static str> {
    IBAN_LENGTHS.iter().map(|(code, _)| *code)
}

pub fn validate_iban(raw: &str) -> Result<ValidIban, IbanError> {
    let iban = normalize(raw);

    if !iban.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err(IbanError::InvalidCharacters);
    }
    if !has_iban_shape(&iban) {
        return Err(IbanError::InvalidFormat);
    }

    let country_code = &iban[..2];
    let expected = expected_length(country_code)
        .ok_or_else(|| IbanError::UnsupportedCountry(country_code.to_string()))?;

    if iban.len() != expected {
        return Err(IbanError::WrongLength {
            country: country_code.to_string(),
            expected,
            actual: iban.len(),
        });
    }
    if mod97(&to_digits(&iban)) != 1 {
        return Err(IbanError::InvalidChecksum);
    }

    Ok(ValidIban {
        formatted: format_iban(&iban),
        country_code: country_code.to_string(),
        electronic: iban,
    })
}

pub fn is_valid_iban(raw: &str) -> bool {
    validate_iban(raw).is_ok()
}

// ^[A-Z]{2}[0-9]{2}[A-Z0-9]+$ on an already normalised string
fn has_iban_shape(iban: &str) -> bool {
    let bytes = iban.as_bytes();

    bytes.len() > 4
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..4].iter().all(u8::is_ascii_digit)
        && bytes[4..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

// Moves the first four characters to the end and expands letters to A=10 .. Z=35.
fn to_digits(iban: &str) -> String {
    let (head, tail) = iban.split_at(4);
    let mut digits = String::with_capacity(iban.len() * 2);

    for c in tail.chars().chain(head.chars()) {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            let value = (c as u8 - b'A') as u32 + 10;
            digits.push_str(&value.to_string());
        }
    }
    digits
}

// Takes up to nine digits at a time, reduces them modulo 97 and prepends the
// remainder to the rest until the digit string is exhausted.
fn mod97(digits: &str) -> u64 {
    let mut remainder = String::new();
    let mut rest = digits;

    while !rest.is_empty() {
        let take = (CHUNK_DIGITS - remainder.len()).min(rest.len());
        let (head, tail) = rest.split_at(take);
        remainder.push_str(head);
        rest = tail;

        let block = remainder
            .bytes()
            .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'));
        remainder = (block % 97).to_string();
    }

    remainder
        .bytes()
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
}
