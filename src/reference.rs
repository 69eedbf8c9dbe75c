//! Human readable mandate references: `M-<member>-<YYYYMMDD>-<NNN>`
//!
//! The three digit suffix only makes collisions unlikely. Uniqueness is
//! enforced by the store, which rejects a duplicate id; the workflow then
//! generates a fresh reference and retries.
use chrono::{DateTime, Utc};
use rand::Rng;

// SEPA limit for the mandate identification field
pub const MAX_REFERENCE_LEN: usize = 35;

// room left for the member part next to "M-", "-YYYYMMDD" and "-NNN"
pub const MAX_IDENTIFIER_LEN: usize = MAX_REFERENCE_LEN - "M--YYYYMMDD-NNN".len();

// hex digits of the identifier digest kept when it has to be shortened
const DIGEST_LEN: usize = 8;

/// What the member store knows about the owner of a mandate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    /// Full record name, e.g. `Assoc-Member-2024-00042`.
    pub record_name: String,
    /// Stable short identifier, when one has been assigned.
    pub member_id: Option<String>,
    pub full_name: String,
}

impl MemberIdentity {
    /// Short identifier, or the record name without `prefix` and hyphens.
    ///
    /// The result always fits a reference: characters outside the SEPA set
    /// are dropped, and an identifier longer than [`MAX_IDENTIFIER_LEN`]
    /// loses its separators, then is cut and tagged with a digest of the
    /// full identifier.
    pub fn reference_identifier(&self, prefix: &str) -> String {
        let raw = match self.member_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self
                .record_name
                .strip_prefix(prefix)
                .unwrap_or(&self.record_name)
                .replace('-', ""),
        };
        fit_identifier(&raw)
    }
}

fn fit_identifier(raw: &str) -> String {
    let allowed: String = raw.chars().filter(|c| is_reference_char(*c)).collect();
    if !allowed.is_empty() && allowed.len() <= MAX_IDENTIFIER_LEN {
        return allowed;
    }

    let compact: String = allowed.chars().filter(char::is_ascii_alphanumeric).collect();
    if !compact.is_empty() && compact.len() <= MAX_IDENTIFIER_LEN {
        return compact;
    }

    let digest = sha256::digest(raw).to_uppercase();
    let head: String = compact.chars().take(MAX_IDENTIFIER_LEN - DIGEST_LEN).collect();
    let tail: String = digest.chars().take(MAX_IDENTIFIER_LEN - head.len()).collect();
    format!("{head}{tail}")
}

fn is_reference_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "/-?:().,'+".contains(c)
}

pub fn generate_reference(identity: &MemberIdentity, now: DateTime<Utc>, prefix: &str) -> String {
    generate_reference_with(identity, now, prefix, &mut rand::thread_rng())
}

pub fn generate_reference_with<R: Rng + ?Sized>(
    identity: &MemberIdentity,
    now: DateTime<Utc>,
    prefix: &str,
    rng: &mut R,
) -> String {
    let suffix: u16 = rng.gen_range(0..1000);

    format!(
        "M-{}-{}-{:03}",
        identity.reference_identifier(prefix),
        now.format("%Y%m%d"),
        suffix
    )
}

/// At most 35 characters from the SEPA identifier set, no spaces.
pub fn is_valid_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference.len() <= MAX_REFERENCE_LEN
        && reference.chars().all(is_reference_char)
}
