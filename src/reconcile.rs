//! Periodic reconciliation of active mandates against member bank details
//!
//! Members paying by direct debit are checked one by one. A member without
//! an active mandate is reported. An active mandate for an IBAN the member
//! no longer uses is cancelled, unless the two IBANs differ in so few places
//! that a typo is the likelier story; those go to manual review. Account
//! holder names that differ only in case, punctuation or spacing are
//! corrected on the mandate, other name differences are reported.
use super::authority::PaymentMethod;
use super::error::MandateError;
use super::iban;
use super::lifecycle::MandateLifecycle;
use super::mandate::Mandate;
use std::collections::HashSet;
use tracing::{info, warn};

// IBANs of equal length differing in at most this many places look like a typo
const TYPO_DISTANCE: usize = 2;

/// Bank details as the member store holds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAccount {
    pub member_id: String,
    pub payment_method: PaymentMethod,
    pub iban: String,
    pub account_holder_name: Option<String>,
}

/// Needs a person to look at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    MissingMandate {
        member_id: String,
        iban: String,
    },
    IbanMismatch {
        member_id: String,
        mandate_id: String,
        mandate_iban: String,
        current_iban: String,
    },
    NameMismatch {
        member_id: String,
        mandate_id: String,
        mandate_name: String,
        current_name: String,
    },
}

/// Corrected without asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    CancelledForIbanChange {
        member_id: String,
        mandate_id: String,
        old_iban: String,
        new_iban: String,
    },
    AccountHolderUpdated {
        member_id: String,
        mandate_id: String,
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciliationReport {
    /// Direct-debit members looked at, including those without an IBAN.
    pub checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub corrections: Vec<Correction>,
    /// Member id and the error that stopped its check or correction.
    pub errors: Vec<(String, MandateError)>,
}

impl ReconciliationReport {
    pub fn needs_review(&self) -> bool {
        !self.discrepancies.is_empty() || !self.errors.is_empty()
    }
}

/// Checks every direct-debit member in `accounts`. A failure for one member
/// is recorded in the report and the run carries on.
pub fn reconcile<'a>(
    lifecycle: &MandateLifecycle,
    accounts: impl IntoIterator<Item = &'a MemberAccount>,
    actor: &str,
) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();

    for account in accounts {
        if account.payment_method != PaymentMethod::SepaDirectDebit {
            continue;
        }
        report.checked += 1;

        if let Err(e) = reconcile_member(lifecycle, account, actor, &mut report) {
            warn!(member_id = %account.member_id, error = %e, "mandate reconciliation failed");
            report.errors.push((account.member_id.clone(), e));
        }
    }

    info!(
        checked = report.checked,
        discrepancies = report.discrepancies.len(),
        corrections = report.corrections.len(),
        errors = report.errors.len(),
        "mandate reconciliation finished"
    );
    report
}

fn reconcile_member(
    lifecycle: &MandateLifecycle,
    account: &MemberAccount,
    actor: &str,
    report: &mut ReconciliationReport,
) -> Result<(), MandateError> {
    let current_iban = iban::normalize(&account.iban);
    if current_iban.is_empty() {
        return Ok(());
    }

    let active: Vec<Mandate> = lifecycle
        .mandates_for_member(&account.member_id)?
        .into_iter()
        .filter(Mandate::is_active)
        .collect();

    if active.is_empty() {
        report.discrepancies.push(Discrepancy::MissingMandate {
            member_id: account.member_id.clone(),
            iban: current_iban,
        });
        return Ok(());
    }

    for mandate in active {
        if mandate.iban() != current_iban {
            if looks_like_typo(mandate.iban(), &current_iban) {
                report.discrepancies.push(Discrepancy::IbanMismatch {
                    member_id: account.member_id.clone(),
                    mandate_id: mandate.mandate_id().to_string(),
                    mandate_iban: mandate.iban().to_string(),
                    current_iban: current_iban.clone(),
                });
            } else {
                cancel_for_iban_change(lifecycle, account, &mandate, &current_iban, actor, report);
                continue;
            }
        }

        let Some(current_name) = account.account_holder_name.as_deref().map(str::trim) else {
            continue;
        };
        if current_name.is_empty() || !names_differ(mandate.account_holder_name(), current_name) {
            continue;
        }

        if same_name_modulo_punctuation(mandate.account_holder_name(), current_name) {
            match lifecycle.update_account_holder_name(mandate.mandate_id(), current_name, actor) {
                Ok(_) => report.corrections.push(Correction::AccountHolderUpdated {
                    member_id: account.member_id.clone(),
                    mandate_id: mandate.mandate_id().to_string(),
                    from: mandate.account_holder_name().to_string(),
                    to: current_name.to_string(),
                }),
                Err(e) => report.errors.push((account.member_id.clone(), e)),
            }
        } else {
            report.discrepancies.push(Discrepancy::NameMismatch {
                member_id: account.member_id.clone(),
                mandate_id: mandate.mandate_id().to_string(),
                mandate_name: mandate.account_holder_name().to_string(),
                current_name: current_name.to_string(),
            });
        }
    }
    Ok(())
}

fn cancel_for_iban_change(
    lifecycle: &MandateLifecycle,
    account: &MemberAccount,
    mandate: &Mandate,
    new_iban: &str,
    actor: &str,
    report: &mut ReconciliationReport,
) {
    let reason = format!("IBAN changed from {} to {new_iban}", mandate.iban());

    match lifecycle.cancel(mandate.mandate_id(), &reason, actor) {
        Ok(_) => report.corrections.push(Correction::CancelledForIbanChange {
            member_id: account.member_id.clone(),
            mandate_id: mandate.mandate_id().to_string(),
            old_iban: mandate.iban().to_string(),
            new_iban: new_iban.to_string(),
        }),
        Err(e) => report.errors.push((account.member_id.clone(), e)),
    }
}

fn looks_like_typo(a: &str, b: &str) -> bool {
    a.chars().count() == b.chars().count()
        && a.chars().zip(b.chars()).filter(|(x, y)| x != y).count() <= TYPO_DISTANCE
}

/// False for the same name, one name containing the other, or more than
/// half of the words of the shorter name shared.
fn names_differ(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return true;
    }
    if a.contains(&b) || b.contains(&a) {
        return false;
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let shared = words_a.intersection(&words_b).count();
    let fewest = words_a.len().min(words_b.len());

    !(fewest > 0 && shared * 2 > fewest)
}

fn same_name_modulo_punctuation(a: &str, b: &str) -> bool {
    fn clean(name: &str) -> String {
        let kept: String = name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
            .collect();
        kept.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    let (a, b) = (clean(a), clean(b));
    !a.is_empty() && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typo_distance() {
        assert!(looks_like_typo("NL91ABNA0417164300", "NL91ABNA0417164399"));
        assert!(!looks_like_typo("NL91ABNA0417164300", "NL20INGB0001234567"));
        assert!(!looks_like_typo("NL91ABNA0417164300", "DE89370400440532013000"));
    }

    #[test]
    fn name_comparison() {
        assert!(!names_differ("J. Jansen", "j. jansen "));
        assert!(!names_differ("Jansen", "J. Jansen"));
        assert!(!names_differ("Jan de Vries", "Jan Pieter de Vries"));
        assert!(names_differ("J. Jansen", "J Jansen"));
        assert!(names_differ("J. Jansen", "P. Bakker"));

        assert!(same_name_modulo_punctuation("J. Jansen", "j  jansen"));
        assert!(same_name_modulo_punctuation("Jansen, J.", "JANSEN J"));
        assert!(!same_name_modulo_punctuation("J. Jansen", "P. Bakker"));
        assert!(!same_name_modulo_punctuation("...", "!!"));
    }
}
