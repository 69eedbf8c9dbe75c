//! Property-based tests for IBAN validation and formatting
//!
//! The conformance set is fixed; alterations and generated IBANs are not.
//! Generated IBANs get their check digits computed here with a plain digit
//! by digit MOD-97, independent of the chunked version in the crate.

use proptest::prelude::*;
use sepa_mandate::{
    error::IbanError,
    iban::{format_iban, normalize, validate_iban},
};

const CONFORMANCE: &[&str] = &[
    "NL91ABNA0417164300",
    "NL20INGB0001234567",
    "NL44RABO0123456789",
    "DE89370400440532013000",
    "FR1420041010050500013M02606",
    "BE68539007547034",
    "MT84MALT011000012345MTLCAST001S",
    "GB29NWBK60161331926819",
];

fn mod97_digitwise(s: &str) -> u32 {
    s.chars().fold(0, |rem, c| {
        let value = c.to_digit(36).unwrap_or(0);
        if value >= 10 {
            (rem * 100 + value) % 97
        } else {
            (rem * 10 + value) % 97
        }
    })
}

fn with_check_digits(country: &str, bban: &str) -> String {
    let check = 98 - mod97_digitwise(&format!("{bban}{country}00"));
    format!("{country}{check:02}{bban}")
}

/// Dutch IBAN: four bank letters and ten account digits
fn dutch_iban_strategy() -> impl Strategy<Value = String> {
    ("[A-Z]{4}", "[0-9]{10}")
        .prop_map(|(bank, account)| with_check_digits("NL", &format!("{bank}{account}")))
}

/// German IBAN: eighteen digits
fn german_iban_strategy() -> impl Strategy<Value = String> {
    "[0-9]{18}".prop_map(|bban| with_check_digits("DE", &bban))
}

fn valid_iban_strategy() -> impl Strategy<Value = String> {
    prop_oneof![dutch_iban_strategy(), german_iban_strategy()]
}

/// Picks a conformance IBAN and replaces one character after the country
/// code with a different one of the same class.
fn altered_strategy() -> impl Strategy<Value = (String, String)> {
    (
        prop::sample::select(CONFORMANCE),
        any::<prop::sample::Index>(),
        1u32..26,
    )
        .prop_map(|(original, position, offset)| {
            let mut chars: Vec<char> = original.chars().collect();
            let i = 2 + position.index(chars.len() - 2);
            let c = chars[i];

            chars[i] = if c.is_ascii_digit() {
                let d = c.to_digit(10).unwrap_or(0);
                char::from_digit((d + 1 + offset % 9) % 10, 10).unwrap_or('0')
            } else {
                let l = c as u32 - 'A' as u32;
                char::from_u32('A' as u32 + (l + offset) % 26).unwrap_or('A')
            };
            (original.to_string(), chars.into_iter().collect())
        })
}

#[test]
fn conformance_set_is_valid() {
    for raw in CONFORMANCE {
        let valid = validate_iban(raw).unwrap();

        assert_eq!(valid.electronic(), *raw);
        assert_eq!(valid.formatted(), format_iban(raw));
        assert_eq!(valid.country_code(), &raw[..2]);
    }
}

#[test]
fn dropped_character_is_wrong_length() {
    for raw in CONFORMANCE {
        let short = &raw[..raw.len() - 1];

        assert!(matches!(
            validate_iban(short),
            Err(IbanError::WrongLength { expected, actual, .. })
                if expected == raw.len() && actual == raw.len() - 1
        ));
    }
}

proptest! {
    /// Property: any single substitution after the country code is caught
    /// by the checksum
    #[test]
    fn prop_single_alteration_is_rejected((original, altered) in altered_strategy()) {
        prop_assert_ne!(&original, &altered);

        let result = validate_iban(&altered);
        prop_assert!(
            matches!(result, Err(IbanError::InvalidChecksum) | Err(IbanError::WrongLength { .. })),
            "{} altered to {} gave {:?}", original, altered, result
        );
    }

    /// Property: generated IBANs with correct check digits validate
    #[test]
    fn prop_generated_ibans_validate(iban in valid_iban_strategy()) {
        prop_assert!(validate_iban(&iban).is_ok());
    }

    /// Property: formatting is idempotent, format(strip(format(x))) == format(x)
    #[test]
    fn prop_format_is_idempotent(iban in valid_iban_strategy()) {
        let formatted = format_iban(&iban);

        let revalidated = validate_iban(&formatted).unwrap();

        prop_assert_eq!(format_iban(&normalize(&formatted)), formatted.clone());
        prop_assert_eq!(revalidated.formatted(), formatted.as_str());
    }

    /// Property: input case and spacing never change the verdict
    #[test]
    fn prop_spacing_and_case_ignored(iban in valid_iban_strategy(), gap in 1usize..6) {
        let spaced: String = iban
            .to_lowercase()
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i > 0 && i % gap == 0 { vec![' ', c] } else { vec![c] })
            .collect();

        let valid = validate_iban(&spaced).unwrap();
        prop_assert_eq!(valid.electronic(), iban.as_str());
    }
}
