//! Service layer for mandate state transitions
//!
//! [`MandateLifecycle`] is the only writer of a mandate's status and its
//! replacement links. Every change runs as a single sled transaction over
//! all trees it touches, so at most one mandate per member and purpose is
//! ever observable as `Active`, and a failed activation leaves the previous
//! mandate untouched.
use super::error::{DraftError, MandateError};
use super::history::{MandateHistory, Transition, TransitionKind};
use super::iban;
use super::mandate::{MAX_HOLDER_NAME_LEN, Mandate, MandateStatus, Purpose};
use chrono::{Months, NaiveDate};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;
use tracing::{debug, info};

const MANDATES_TREE: &str = "mandates";
const ACTIVE_TREE: &str = "active";
const MEMBER_TREE: &str = "member_mandates";
const HISTORY_TREE: &str = "history";

// SEPA: a mandate lapses 36 months after signing unless renewed
pub const DEFAULT_VALIDITY_MONTHS: u32 = 36;

type TxResult<T> = Result<T, ConflictableTransactionError<MandateError>>;

/// Result of an activation: the new mandate and whatever it took over from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub activated: Mandate,
    pub replaced: Vec<Mandate>,
}

impl Activation {
    /// The replaced mandate, for the usual single-replacement case.
    pub fn replaced_one(&self) -> Option<&Mandate> {
        self.replaced.first()
    }
}

/// How a member's active mandates relate to an IBAN they entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IbanAssessment {
    /// No active mandate at all, a first mandate is needed.
    NoMandate,
    /// An active mandate already debits this IBAN.
    Matches(Mandate),
    /// Active mandates exist, but none for this IBAN. Carries one of them.
    Mismatch(Mandate),
}

impl IbanAssessment {
    pub fn needs_new_mandate(&self) -> bool {
        !matches!(self, IbanAssessment::Matches(_))
    }
}

/// Dashboard flags for one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MandateIndicator {
    pub has_active_mandate: bool,
    pub expiring_soon: bool,
}

#[derive(Clone)]
pub struct MandateLifecycle {
    mandates: Tree,        // mandate id -> cbor record
    active: Tree,          // member + purpose -> mandate id
    member_mandates: Tree, // member + mandate id -> ()
    history: Tree,         // mandate id -> cbor transition log
    validity_months: u32,
}

struct Trees<'a> {
    mandates: &'a TransactionalTree,
    active: &'a TransactionalTree,
    members: &'a TransactionalTree,
    history: &'a TransactionalTree,
}

impl MandateLifecycle {
    pub fn new(instance: Arc<Db>) -> Result<Self, MandateError> {
        Ok(Self {
            mandates: instance.open_tree(MANDATES_TREE)?,
            active: instance.open_tree(ACTIVE_TREE)?,
            member_mandates: instance.open_tree(MEMBER_TREE)?,
            history: instance.open_tree(HISTORY_TREE)?,
            validity_months: DEFAULT_VALIDITY_MONTHS,
        })
    }

    pub fn with_validity_months(mut self, months: u32) -> Self {
        self.validity_months = months;
        self
    }

    pub fn find(&self, mandate_id: &str) -> Result<Option<Mandate>, MandateError> {
        match self.mandates.get(mandate_id.as_bytes())? {
            Some(bytes) => Ok(Some(Mandate::from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, mandate_id: &str) -> Result<Mandate, MandateError> {
        self.find(mandate_id)?
            .ok_or_else(|| MandateError::NotFound(mandate_id.to_string()))
    }

    pub fn history(&self, mandate_id: &str) -> Result<MandateHistory, MandateError> {
        match self.history.get(mandate_id.as_bytes())? {
            Some(bytes) => MandateHistory::from_cbor(&bytes),
            None => Err(MandateError::NotFound(mandate_id.to_string())),
        }
    }

    pub fn reference_available(&self, mandate_id: &str) -> Result<bool, MandateError> {
        Ok(!self.mandates.contains_key(mandate_id.as_bytes())?)
    }

    /// Every mandate the member ever had, oldest first.
    pub fn mandates_for_member(&self, member_id: &str) -> Result<Vec<Mandate>, MandateError> {
        let prefix = member_prefix(member_id);
        let mut mandates = vec![];

        for entry in self.member_mandates.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let mandate_id = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|e| MandateError::Codec(e.to_string()))?;
            mandates.push(self.get(mandate_id)?);
        }

        mandates.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.mandate_id().cmp(b.mandate_id()))
        });
        Ok(mandates)
    }

    pub fn active_for(
        &self,
        member_id: &str,
        purpose: Purpose,
    ) -> Result<Option<Mandate>, MandateError> {
        match self.active.get(slot_key(member_id, purpose))? {
            Some(id) => {
                let mandate_id =
                    std::str::from_utf8(&id).map_err(|e| MandateError::Codec(e.to_string()))?;
                self.find(mandate_id)
            }
            None => Ok(None),
        }
    }

    /// Active mandates of the same member that share a purpose with `candidate`.
    pub fn active_overlapping(&self, candidate: &Mandate) -> Result<Vec<Mandate>, MandateError> {
        let mut found: Vec<Mandate> = vec![];

        for purpose in candidate.purposes() {
            if let Some(mandate) = self.active_for(candidate.member_id(), purpose)? {
                if !found.iter().any(|m| m.mandate_id() == mandate.mandate_id()) {
                    found.push(mandate);
                }
            }
        }
        Ok(found)
    }

    /// The active mandate that debits `raw_iban` for this member, if any.
    pub fn current_for_iban(
        &self,
        member_id: &str,
        raw_iban: &str,
    ) -> Result<Option<Mandate>, MandateError> {
        let wanted = iban::normalize(raw_iban);

        Ok(self
            .mandates_for_member(member_id)?
            .into_iter()
            .filter(|m| m.is_active() && m.iban() == wanted)
            .last())
    }

    pub fn assess_iban(
        &self,
        member_id: &str,
        raw_iban: &str,
    ) -> Result<IbanAssessment, MandateError> {
        if let Some(current) = self.current_for_iban(member_id, raw_iban)? {
            return Ok(IbanAssessment::Matches(current));
        }

        let other = self
            .mandates_for_member(member_id)?
            .into_iter()
            .find(Mandate::is_active);

        Ok(match other {
            Some(mandate) => IbanAssessment::Mismatch(mandate),
            None => IbanAssessment::NoMandate,
        })
    }

    pub fn indicator(
        &self,
        member_id: &str,
        today: NaiveDate,
        warning_days: u32,
    ) -> Result<MandateIndicator, MandateError> {
        let active: Vec<Mandate> = self
            .mandates_for_member(member_id)?
            .into_iter()
            .filter(Mandate::is_active)
            .collect();

        Ok(MandateIndicator {
            has_active_mandate: !active.is_empty(),
            expiring_soon: active.iter().any(|m| m.expires_within(today, warning_days)),
        })
    }

    /// Active mandates of all members that lapse within `warning_days`.
    pub fn expiring_soon(
        &self,
        today: NaiveDate,
        warning_days: u32,
    ) -> Result<Vec<Mandate>, MandateError> {
        let mut soon = vec![];
        for entry in self.mandates.iter() {
            let (_, bytes) = entry?;
            let mandate = Mandate::from_cbor(&bytes)?;
            if mandate.expires_within(today, warning_days) {
                soon.push(mandate);
            }
        }
        soon.sort_by_key(Mandate::expiry_date);
        Ok(soon)
    }

    /// Persists a drafted mandate as `PendingActivation`.
    pub fn submit(&self, draft: Mandate, actor: &str) -> Result<Mandate, MandateError> {
        let submitted = self.in_transaction(|trees| insert_pending(trees, &draft, actor))?;

        debug!(mandate_id = submitted.mandate_id(), "mandate submitted");
        Ok(submitted)
    }

    /// Activates a pending mandate, retiring whatever active mandates of the
    /// same member share a purpose with it.
    ///
    /// When `expected_replaced` is given it must name exactly the mandates
    /// currently holding those purposes. Anything else means another writer
    /// got in between and the call fails with `ConcurrentMandateConflict`
    /// without touching either side.
    pub fn activate(
        &self,
        mandate_id: &str,
        expected_replaced: Option<&[String]>,
        actor: &str,
    ) -> Result<Activation, MandateError> {
        let activation = self.in_transaction(|trees| {
            activate_pending(trees, mandate_id, expected_replaced, actor, self.validity_months)
        })?;

        log_activation(&activation);
        Ok(activation)
    }

    /// Submits and activates a draft in one transaction. A duplicate id or a
    /// conflict leaves nothing behind.
    pub fn activate_draft(
        &self,
        draft: Mandate,
        expected_replaced: Option<&[String]>,
        actor: &str,
    ) -> Result<Activation, MandateError> {
        let activation = self.in_transaction(|trees| {
            let pending = insert_pending(trees, &draft, actor)?;
            activate_pending(
                trees,
                pending.mandate_id(),
                expected_replaced,
                actor,
                self.validity_months,
            )
        })?;

        log_activation(&activation);
        Ok(activation)
    }

    pub fn cancel(
        &self,
        mandate_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<Mandate, MandateError> {
        let cancelled = self.in_transaction(|trees| {
            retire(
                trees,
                mandate_id,
                TransitionKind::Cancelled {
                    reason: reason.to_string(),
                },
                actor,
            )
        })?;

        info!(mandate_id, reason, "mandate cancelled");
        Ok(cancelled)
    }

    /// Corrects the account holder on an active mandate. The change is
    /// recorded in the mandate's history; the status stays `Active`.
    pub fn update_account_holder_name(
        &self,
        mandate_id: &str,
        name: &str,
        actor: &str,
    ) -> Result<Mandate, MandateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DraftError::MissingField("account holder name").into());
        }
        if name.chars().count() > MAX_HOLDER_NAME_LEN {
            return Err(DraftError::HolderNameTooLong {
                max: MAX_HOLDER_NAME_LEN,
            }
            .into());
        }

        let updated = self.in_transaction(|trees| {
            let mut mandate = load(trees, mandate_id)?;
            if !mandate.is_active() {
                return abort(MandateError::InvalidTransition {
                    mandate_id: mandate_id.to_string(),
                    from: mandate.status,
                    to: MandateStatus::Active,
                });
            }

            let from = std::mem::replace(&mut mandate.account_holder_name, name.to_string());
            save(trees, &mandate)?;
            record(
                trees,
                Transition::new(
                    mandate_id,
                    actor,
                    TransitionKind::AccountHolderChanged {
                        from,
                        to: name.to_string(),
                    },
                ),
            )?;
            Ok(mandate)
        })?;

        info!(mandate_id, "mandate account holder updated");
        Ok(updated)
    }

    /// Moves every active mandate whose expiry date is on or before `today`
    /// to `Expired`.
    pub fn expire_due(&self, today: NaiveDate, actor: &str) -> Result<Vec<Mandate>, MandateError> {
        let mut due = vec![];
        for entry in self.mandates.iter() {
            let (_, bytes) = entry?;
            let mandate = Mandate::from_cbor(&bytes)?;
            if mandate.is_active() && mandate.expiry_date().is_some_and(|d| d <= today) {
                due.push(mandate);
            }
        }

        let mut expired = vec![];
        for mandate in due {
            let Some(expiry_date) = mandate.expiry_date else {
                continue;
            };
            let result = self.in_transaction(|trees| {
                retire(
                    trees,
                    mandate.mandate_id(),
                    TransitionKind::Expired { expiry_date },
                    actor,
                )
            });
            match result {
                Ok(mandate) => {
                    info!(mandate_id = mandate.mandate_id(), %expiry_date, "mandate expired");
                    expired.push(mandate);
                }
                // replaced or cancelled since the scan
                Err(MandateError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    fn in_transaction<T>(
        &self,
        f: impl Fn(&Trees<'_>) -> TxResult<T>,
    ) -> Result<T, MandateError> {
        let result = (
            &self.mandates,
            &self.active,
            &self.member_mandates,
            &self.history,
        )
            .transaction(|(mandates, active, members, history)| {
                f(&Trees {
                    mandates,
                    active,
                    members,
                    history,
                })
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }
}

fn log_activation(activation: &Activation) {
    let replaced: Vec<&str> = activation
        .replaced
        .iter()
        .map(Mandate::mandate_id)
        .collect();

    info!(
        mandate_id = activation.activated.mandate_id(),
        member_id = activation.activated.member_id(),
        ?replaced,
        "mandate activated"
    );
}

fn member_prefix(member_id: &str) -> String {
    format!("{member_id}\u{0}")
}

fn slot_key(member_id: &str, purpose: Purpose) -> Vec<u8> {
    format!("{member_id}\u{0}{}", purpose.as_str()).into_bytes()
}

fn abort<T>(err: MandateError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn load(trees: &Trees<'_>, mandate_id: &str) -> TxResult<Mandate> {
    match trees.mandates.get(mandate_id.as_bytes())? {
        Some(bytes) => Mandate::from_cbor(&bytes).map_err(ConflictableTransactionError::Abort),
        None => abort(MandateError::NotFound(mandate_id.to_string())),
    }
}

fn save(trees: &Trees<'_>, mandate: &Mandate) -> TxResult<()> {
    let bytes = mandate.to_cbor().map_err(ConflictableTransactionError::Abort)?;
    trees.mandates.insert(mandate.mandate_id.as_bytes(), bytes)?;
    Ok(())
}

fn record(trees: &Trees<'_>, transition: Transition) -> TxResult<()> {
    let key = transition.mandate_id.clone();
    let mut history = match trees.history.get(key.as_bytes())? {
        Some(bytes) => {
            MandateHistory::from_cbor(&bytes).map_err(ConflictableTransactionError::Abort)?
        }
        None => MandateHistory::new(&key),
    };
    history.insert_transition(transition);

    let bytes = history.to_cbor().map_err(ConflictableTransactionError::Abort)?;
    trees.history.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn transition_to(mandate: &mut Mandate, next: MandateStatus) -> TxResult<()> {
    if !mandate.status.can_transition_to(next) {
        return abort(MandateError::InvalidTransition {
            mandate_id: mandate.mandate_id.clone(),
            from: mandate.status,
            to: next,
        });
    }
    mandate.status = next;
    Ok(())
}

// Frees the purpose slots still pointing at this mandate.
fn release_slots(trees: &Trees<'_>, mandate: &Mandate) -> TxResult<()> {
    for purpose in mandate.purposes() {
        let key = slot_key(&mandate.member_id, purpose);
        if let Some(holder) = trees.active.get(&key)? {
            if &*holder == mandate.mandate_id.as_bytes() {
                trees.active.remove(key)?;
            }
        }
    }
    Ok(())
}

fn insert_pending(trees: &Trees<'_>, draft: &Mandate, actor: &str) -> TxResult<Mandate> {
    if trees.mandates.get(draft.mandate_id.as_bytes())?.is_some() {
        return abort(MandateError::DuplicateMandateId(draft.mandate_id.clone()));
    }

    let mut mandate = draft.clone();
    transition_to(&mut mandate, MandateStatus::PendingActivation)?;
    save(trees, &mandate)?;

    let member_key = format!("{}{}", member_prefix(&mandate.member_id), mandate.mandate_id);
    trees.members.insert(member_key.as_bytes(), Vec::<u8>::new())?;

    record(
        trees,
        Transition::new(&mandate.mandate_id, actor, TransitionKind::Submitted),
    )?;
    Ok(mandate)
}

fn activate_pending(
    trees: &Trees<'_>,
    mandate_id: &str,
    expected_replaced: Option<&[String]>,
    actor: &str,
    validity_months: u32,
) -> TxResult<Activation> {
    let mut mandate = load(trees, mandate_id)?;
    transition_to(&mut mandate, MandateStatus::Active)?;

    // current holders of the purposes this mandate claims
    let mut found: Vec<String> = vec![];
    for purpose in mandate.purposes() {
        if let Some(holder) = trees.active.get(slot_key(&mandate.member_id, purpose))? {
            let holder = String::from_utf8(holder.to_vec()).map_err(|e| {
                ConflictableTransactionError::Abort(MandateError::Codec(e.to_string()))
            })?;
            if !found.contains(&holder) {
                found.push(holder);
            }
        }
    }

    if let Some(expected) = expected_replaced {
        let mut expected = expected.to_vec();
        expected.sort();
        expected.dedup();
        let mut current = found.clone();
        current.sort();

        if expected != current {
            return abort(MandateError::ConcurrentMandateConflict {
                member_id: mandate.member_id.clone(),
                expected,
                found: current,
            });
        }
    }

    let mut replaced = vec![];
    for old_id in &found {
        let mut old = load(trees, old_id)?;
        transition_to(&mut old, MandateStatus::Replaced)?;
        old.replaced_by = Some(mandate.mandate_id.clone());
        release_slots(trees, &old)?;
        save(trees, &old)?;
        record(
            trees,
            Transition::new(
                old_id,
                actor,
                TransitionKind::Replaced {
                    replaced_by: mandate.mandate_id.clone(),
                },
            ),
        )?;
        replaced.push(old);
    }

    mandate.replaces = found.clone();
    if mandate.expiry_date.is_none() {
        mandate.expiry_date = mandate
            .sign_date
            .date()
            .checked_add_months(Months::new(validity_months))
            .map(Into::into);
    }
    for purpose in mandate.purposes() {
        trees
            .active
            .insert(slot_key(&mandate.member_id, purpose), mandate.mandate_id.as_bytes())?;
    }
    save(trees, &mandate)?;
    record(
        trees,
        Transition::new(
            &mandate.mandate_id,
            actor,
            TransitionKind::Activated { replaces: found },
        ),
    )?;

    Ok(Activation {
        activated: mandate,
        replaced,
    })
}

fn retire(
    trees: &Trees<'_>,
    mandate_id: &str,
    kind: TransitionKind,
    actor: &str,
) -> TxResult<Mandate> {
    let mut mandate = load(trees, mandate_id)?;
    let next = kind.resulting_status().unwrap_or(mandate.status);
    transition_to(&mut mandate, next)?;
    release_slots(trees, &mandate)?;
    save(trees, &mandate)?;
    record(trees, Transition::new(mandate_id, actor, kind))?;
    Ok(mandate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::MandateDraft;
    use tempfile::tempdir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn draft(reference: &str, iban: &str, memberships: bool, donations: bool) -> Mandate {
        MandateDraft::new("MEM-1")
            .set_reference(reference)
            .set_iban(iban)
            .set_account_holder_name("A. de Vries")
            .set_purposes(memberships, donations)
            .validate_and_finalise(today())
            .unwrap()
    }

    fn open_lifecycle() -> anyhow::Result<(tempfile::TempDir, MandateLifecycle)> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("lifecycle.db"))?;
        Ok((temp_dir, MandateLifecycle::new(Arc::new(db))?))
    }

    #[test]
    fn submit_then_activate() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        let pending = lifecycle.submit(draft("M-1-A", "NL91ABNA0417164300", true, false), "test")?;
        assert_eq!(pending.status(), MandateStatus::PendingActivation);
        assert!(!lifecycle.reference_available("M-1-A")?);

        let activation = lifecycle.activate("M-1-A", Some(&[]), "test")?;
        assert!(activation.replaced.is_empty());
        assert_eq!(activation.activated.status(), MandateStatus::Active);
        assert_eq!(
            activation.activated.expiry_date(),
            NaiveDate::from_ymd_opt(2027, 6, 15)
        );
        assert_eq!(
            lifecycle.active_for("MEM-1", Purpose::Memberships)?,
            Some(activation.activated)
        );
        Ok(())
    }

    #[test]
    fn duplicate_reference_is_rejected() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        lifecycle.submit(draft("M-1-A", "NL91ABNA0417164300", true, false), "test")?;
        let err = lifecycle
            .activate_draft(draft("M-1-A", "NL20INGB0001234567", true, false), None, "test")
            .unwrap_err();

        assert_eq!(err, MandateError::DuplicateMandateId("M-1-A".into()));
        assert_eq!(lifecycle.get("M-1-A")?.iban(), "NL91ABNA0417164300");
        Ok(())
    }

    #[test]
    fn activating_twice_is_rejected() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        lifecycle.activate_draft(draft("M-1-A", "NL91ABNA0417164300", true, false), None, "test")?;
        let err = lifecycle.activate("M-1-A", None, "test").unwrap_err();

        assert!(matches!(
            err,
            MandateError::InvalidTransition {
                from: MandateStatus::Active,
                to: MandateStatus::Active,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn stale_expectation_is_a_conflict() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        lifecycle.activate_draft(draft("M-1-A", "NL91ABNA0417164300", true, false), None, "test")?;
        // caller validated before M-1-A existed
        let err = lifecycle
            .activate_draft(draft("M-1-B", "NL20INGB0001234567", true, false), Some(&[]), "test")
            .unwrap_err();

        assert!(matches!(err, MandateError::ConcurrentMandateConflict { .. }));
        assert!(lifecycle.find("M-1-B")?.is_none());
        assert!(lifecycle.get("M-1-A")?.is_active());
        Ok(())
    }

    #[test]
    fn cancel_frees_the_slot() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        lifecycle.activate_draft(draft("M-1-A", "NL91ABNA0417164300", true, true), None, "test")?;
        let cancelled = lifecycle.cancel("M-1-A", "member request", "operator")?;

        assert_eq!(cancelled.status(), MandateStatus::Cancelled);
        assert_eq!(lifecycle.active_for("MEM-1", Purpose::Donations)?, None);
        assert!(lifecycle.cancel("M-1-A", "again", "operator").is_err());
        assert_eq!(
            lifecycle.history("M-1-A")?.current_status(),
            MandateStatus::Cancelled
        );
        Ok(())
    }

    #[test]
    fn expiry_moves_due_mandates_only() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;
        let lifecycle = lifecycle.with_validity_months(1);

        lifecycle.activate_draft(draft("M-1-A", "NL91ABNA0417164300", true, false), None, "test")?;
        lifecycle.activate_draft(draft("M-1-B", "NL20INGB0001234567", false, true), None, "test")?;

        assert!(lifecycle.expire_due(today(), "scheduler")?.is_empty());

        let month_later = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        let expired = lifecycle.expire_due(month_later, "scheduler")?;
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|m| m.status() == MandateStatus::Expired));
        assert_eq!(lifecycle.active_for("MEM-1", Purpose::Memberships)?, None);
        Ok(())
    }

    #[test]
    fn iban_assessment() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;

        assert_eq!(
            lifecycle.assess_iban("MEM-1", "NL91ABNA0417164300")?,
            IbanAssessment::NoMandate
        );

        lifecycle.activate_draft(draft("M-1-A", "NL91ABNA0417164300", true, false), None, "test")?;

        assert!(matches!(
            lifecycle.assess_iban("MEM-1", "nl91 abna 0417 1643 00")?,
            IbanAssessment::Matches(_)
        ));
        let assessment = lifecycle.assess_iban("MEM-1", "NL20INGB0001234567")?;
        assert!(matches!(assessment, IbanAssessment::Mismatch(_)));
        assert!(assessment.needs_new_mandate());
        Ok(())
    }

    #[test]
    fn expiring_soon_indicator() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;
        let lifecycle = lifecycle.with_validity_months(1);

        assert_eq!(
            lifecycle.indicator("MEM-1", today(), 30)?,
            MandateIndicator::default()
        );

        // expires 2024-07-15
        let draft = draft("M-1-A", "NL91ABNA0417164300", true, false);
        lifecycle.activate_draft(draft, None, "test")?;

        let three_weeks_before = NaiveDate::from_ymd_opt(2024, 6, 24).unwrap();
        let indicator = lifecycle.indicator("MEM-1", three_weeks_before, 30)?;
        assert!(indicator.has_active_mandate && indicator.expiring_soon);
        assert!(!lifecycle.indicator("MEM-1", three_weeks_before, 7)?.expiring_soon);
        assert_eq!(lifecycle.expiring_soon(three_weeks_before, 30)?.len(), 1);

        // on the expiry date it is due, not expiring soon
        let due = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        assert!(!lifecycle.indicator("MEM-1", due, 30)?.expiring_soon);
        assert!(lifecycle.expiring_soon(due, 30)?.is_empty());
        Ok(())
    }

    #[test]
    fn account_holder_update_is_recorded() -> anyhow::Result<()> {
        let (_dir, lifecycle) = open_lifecycle()?;
        let draft = draft("M-1-A", "NL91ABNA0417164300", true, false);
        lifecycle.activate_draft(draft, None, "test")?;

        let updated = lifecycle.update_account_holder_name("M-1-A", " A de Vries ", "reconciler")?;
        assert_eq!(updated.account_holder_name(), "A de Vries");
        assert!(updated.is_active());

        let history = lifecycle.history("M-1-A")?;
        assert_eq!(history.current_status(), MandateStatus::Active);
        assert_eq!(
            history.transitions.last().map(|t| &t.kind),
            Some(&TransitionKind::AccountHolderChanged {
                from: "A. de Vries".into(),
                to: "A de Vries".into(),
            })
        );

        assert!(matches!(
            lifecycle.update_account_holder_name("M-1-A", "  ", "reconciler"),
            Err(MandateError::Draft(DraftError::MissingField(_)))
        ));

        lifecycle.cancel("M-1-A", "closed", "operator")?;
        assert!(matches!(
            lifecycle.update_account_holder_name("M-1-A", "A. de Vries", "reconciler"),
            Err(MandateError::InvalidTransition { .. })
        ));
        Ok(())
    }
}
