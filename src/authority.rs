//! Collaborators at the edge of the mandate core
//!
//! The workflow and the synchronizer only see these traits. [`LocalAuthority`]
//! implements the authoritative side in-process on top of
//! [`MandateLifecycle`]; a remote deployment would put an RPC client behind
//! the same traits. [`MemberRegistry`] is a small in-memory member store.
use super::bank::{self, BankInfo};
use super::config::MandateConfig;
use super::error::MandateError;
use super::iban::{self, ValidIban};
use super::lifecycle::{Activation, IbanAssessment, MandateLifecycle};
use super::mandate::{Mandate, MandateStatus};
use super::reference::MemberIdentity;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaymentMethod {
    SepaDirectDebit,
    #[default]
    BankTransfer,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SepaDirectDebit => "SEPA Direct Debit",
            Self::BankTransfer => "Bank Transfer",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_ascii_lowercase().as_str() {
            "sepa direct debit" | "sepa" | "direct debit" => Self::SepaDirectDebit,
            "bank transfer" | "transfer" => Self::BankTransfer,
            _ => Self::Other,
        };
        Ok(method)
    }
}

/// The authoritative answer to "may this draft be activated, and what would
/// it replace".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCheck {
    /// Active mandates of the member that share a purpose with the draft.
    pub existing_active: Vec<Mandate>,
    pub assessment: IbanAssessment,
}

impl ServerCheck {
    pub fn replaces(&self) -> Vec<String> {
        self.existing_active
            .iter()
            .map(|m| m.mandate_id().to_string())
            .collect()
    }
}

/// Read-only projection shown next to an IBAN field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MandateStatusView {
    pub mandate_id: String,
    pub status: MandateStatus,
    pub formatted_iban: String,
    pub sign_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

impl From<&Mandate> for MandateStatusView {
    fn from(mandate: &Mandate) -> Self {
        Self {
            mandate_id: mandate.mandate_id().to_string(),
            status: mandate.status(),
            formatted_iban: mandate.formatted_iban(),
            sign_date: mandate.sign_date(),
            expiry_date: mandate.expiry_date(),
        }
    }
}

#[async_trait]
pub trait MandateAuthority: Send + Sync {
    /// Re-validates the draft and reports what an activation would replace.
    /// A taken reference is reported as `DuplicateMandateId`.
    async fn validate(&self, draft: &Mandate) -> Result<ServerCheck, MandateError>;

    /// Persists and activates the draft. `replaces` must name exactly the
    /// mandates `validate` reported.
    async fn activate(
        &self,
        draft: Mandate,
        replaces: Vec<String>,
    ) -> Result<Activation, MandateError>;
}

#[async_trait]
pub trait MandateLookup: Send + Sync {
    async fn current_mandate(
        &self,
        member_id: &str,
        iban: &str,
        payment_method: PaymentMethod,
    ) -> Result<Option<MandateStatusView>, MandateError>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn member_identity(&self, member_id: &str) -> Result<MemberIdentity, MandateError>;

    async fn set_payment_method(
        &self,
        member_id: &str,
        method: PaymentMethod,
    ) -> Result<(), MandateError>;
}

/// External BIC and bank name directory, keyed by the full IBAN.
#[async_trait]
pub trait BankDirectory: Send + Sync {
    async fn lookup(&self, iban: &ValidIban) -> Result<Option<BankInfo>, MandateError>;
}

/// Local table first, then the directory. A failing directory counts as
/// "unknown".
pub async fn resolve_bank(
    iban: &ValidIban,
    directory: Option<&dyn BankDirectory>,
) -> Option<BankInfo> {
    if let Some(info) = bank::local_bank_info(iban) {
        return Some(info);
    }

    match directory?.lookup(iban).await {
        Ok(info) => info,
        Err(e) => {
            warn!(iban = iban.formatted(), error = %e, "bank directory lookup failed");
            None
        }
    }
}

#[derive(Clone)]
pub struct LocalAuthority {
    lifecycle: MandateLifecycle,
    actor: String,
}

impl LocalAuthority {
    pub fn new(lifecycle: MandateLifecycle) -> Self {
        Self {
            lifecycle,
            actor: "local-authority".to_string(),
        }
    }

    pub fn open(config: &MandateConfig) -> Result<Self, MandateError> {
        let db = sled::open(&config.db_path)?;
        let lifecycle =
            MandateLifecycle::new(Arc::new(db))?.with_validity_months(config.validity_months);
        Ok(Self::new(lifecycle))
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn lifecycle(&self) -> &MandateLifecycle {
        &self.lifecycle
    }
}

#[async_trait]
impl MandateAuthority for LocalAuthority {
    async fn validate(&self, draft: &Mandate) -> Result<ServerCheck, MandateError> {
        iban::validate_iban(draft.iban())?;

        if !self.lifecycle.reference_available(draft.mandate_id())? {
            return Err(MandateError::DuplicateMandateId(
                draft.mandate_id().to_string(),
            ));
        }

        Ok(ServerCheck {
            existing_active: self.lifecycle.active_overlapping(draft)?,
            assessment: self.lifecycle.assess_iban(draft.member_id(), draft.iban())?,
        })
    }

    async fn activate(
        &self,
        draft: Mandate,
        replaces: Vec<String>,
    ) -> Result<Activation, MandateError> {
        self.lifecycle
            .activate_draft(draft, Some(replaces.as_slice()), &self.actor)
    }
}

#[async_trait]
impl MandateLookup for LocalAuthority {
    async fn current_mandate(
        &self,
        member_id: &str,
        iban: &str,
        _payment_method: PaymentMethod,
    ) -> Result<Option<MandateStatusView>, MandateError> {
        Ok(self
            .lifecycle
            .current_for_iban(member_id, iban)?
            .as_ref()
            .map(MandateStatusView::from))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub identity: MemberIdentity,
    pub payment_method: PaymentMethod,
}

/// In-memory [`MemberDirectory`].
#[derive(Clone, Default)]
pub struct MemberRegistry {
    members: Arc<Mutex<HashMap<String, MemberRecord>>>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a member under its short id, or its record name when it has none.
    pub fn insert(&self, identity: MemberIdentity) {
        let key = identity
            .member_id
            .clone()
            .unwrap_or_else(|| identity.record_name.clone());

        self.members.lock().insert(
            key,
            MemberRecord {
                identity,
                payment_method: PaymentMethod::default(),
            },
        );
    }

    pub fn get(&self, member_id: &str) -> Option<MemberRecord> {
        self.members.lock().get(member_id).cloned()
    }
}

#[async_trait]
impl MemberDirectory for MemberRegistry {
    async fn member_identity(&self, member_id: &str) -> Result<MemberIdentity, MandateError> {
        self.get(member_id)
            .map(|record| record.identity)
            .ok_or_else(|| MandateError::NetworkOrService(format!("member {member_id} not found")))
    }

    async fn set_payment_method(
        &self,
        member_id: &str,
        method: PaymentMethod,
    ) -> Result<(), MandateError> {
        match self.members.lock().get_mut(member_id) {
            Some(record) => {
                record.payment_method = method;
                Ok(())
            }
            None => Err(MandateError::NetworkOrService(format!(
                "member {member_id} not found"
            ))),
        }
    }
}
