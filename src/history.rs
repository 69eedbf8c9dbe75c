//! Append-only audit trail of mandate transitions
//!
//! Mandates are never deleted. Every status change appends a [`Transition`]
//! to the mandate's [`MandateHistory`], and each transition carries a content
//! digest so an exported history can be checked for tampering.
use super::error::MandateError;
use super::mandate::{CalendarDate, MandateStatus, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct MandateHistory {
    #[n(0)]
    pub mandate_id: String,
    #[n(1)]
    pub transitions: Vec<Transition>,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Transition {
    #[n(0)]
    pub mandate_id: String,
    #[n(1)]
    pub actor: String, // who or what caused the change
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub kind: TransitionKind,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum TransitionKind {
    #[n(0)]
    Submitted,
    #[n(1)]
    Activated {
        #[n(0)]
        replaces: Vec<String>,
    },
    #[n(2)]
    Replaced {
        #[n(0)]
        replaced_by: String,
    },
    #[n(3)]
    Cancelled {
        #[n(0)]
        reason: String,
    },
    #[n(4)]
    Expired {
        #[n(0)]
        expiry_date: CalendarDate,
    },
    #[n(5)]
    AccountHolderChanged {
        #[n(0)]
        from: String,
        #[n(1)]
        to: String,
    },
}

impl TransitionKind {
    /// The status this transition moves to, `None` for record edits.
    pub fn resulting_status(&self) -> Option<MandateStatus> {
        match self {
            Self::Submitted => Some(MandateStatus::PendingActivation),
            Self::Activated { .. } => Some(MandateStatus::Active),
            Self::Replaced { .. } => Some(MandateStatus::Replaced),
            Self::Cancelled { .. } => Some(MandateStatus::Cancelled),
            Self::Expired { .. } => Some(MandateStatus::Expired),
            Self::AccountHolderChanged { .. } => None,
        }
    }
}

impl Transition {
    pub fn new(mandate_id: &str, actor: &str, kind: TransitionKind) -> Self {
        Self {
            mandate_id: mandate_id.to_string(),
            actor: actor.to_string(),
            timestamp: TimeStamp::new(),
            kind,
        }
    }
    /// CBOR encoding and its SHA-256 digest.
    pub fn build(&self) -> Result<(String, Vec<u8>), MandateError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
    pub fn digest(&self) -> Result<String, MandateError> {
        self.build().map(|(hash, _)| hash)
    }
}

impl MandateHistory {
    pub fn new(mandate_id: &str) -> Self {
        Self {
            mandate_id: mandate_id.to_string(),
            transitions: vec![],
        }
    }

    pub fn insert_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Replays the log from `Draft`. Entries that do not follow a lifecycle
    /// edge are skipped, so once a terminal status is reached it sticks.
    pub fn current_status(&self) -> MandateStatus {
        self.transitions
            .iter()
            .fold(MandateStatus::Draft, |status, transition| {
                match transition.kind.resulting_status() {
                    Some(next) if status.can_transition_to(next) => next,
                    _ => status,
                }
            })
    }

    /// One line per transition, oldest first.
    pub fn timeline(&self) -> Vec<String> {
        self.transitions
            .iter()
            .map(|t| {
                let detail = match &t.kind {
                    TransitionKind::Submitted => "submitted".to_string(),
                    TransitionKind::Activated { replaces } if replaces.is_empty() => {
                        "activated".to_string()
                    }
                    TransitionKind::Activated { replaces } => {
                        format!("activated, replacing {}", replaces.join(", "))
                    }
                    TransitionKind::Replaced { replaced_by } => {
                        format!("replaced by {replaced_by}")
                    }
                    TransitionKind::Cancelled { reason } => format!("cancelled: {reason}"),
                    TransitionKind::Expired { expiry_date } => {
                        format!("expired on {expiry_date}")
                    }
                    TransitionKind::AccountHolderChanged { from, to } => {
                        format!("account holder changed from {from:?} to {to:?}")
                    }
                };
                format!(
                    "{} {} by {}",
                    t.timestamp.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
                    detail,
                    t.actor
                )
            })
            .collect()
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, MandateError> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MandateError> {
        Ok(minicbor::decode(bytes)?)
    }
}
