//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

/// Human readable part of editing-context identifiers.
pub const CONTEXT_HRP: &str = "mctx";

// time ordered uuid, bech32m encoded under the given prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Identifier for one editing context (a form, a session), used to tell
/// workflow and synchronizer events apart in logs.
pub fn new_context_id() -> String {
    new_uuid_to_bech32(CONTEXT_HRP).unwrap_or_else(|_| uuid7().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_prefixed_and_distinct() {
        let a = new_context_id();
        let b = new_context_id();

        assert!(a.starts_with("mctx1"));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(new_uuid_to_bech32("").is_err());
    }
}
