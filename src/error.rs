//! Error kinds for validation, drafting and the mandate lifecycle

/// Local IBAN rejections. None of these ever reach the network.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IbanError {
    #[error("IBAN contains invalid characters, only letters and digits are allowed")]
    InvalidCharacters,
    #[error("IBAN must start with a country code and two check digits")]
    InvalidFormat,
    #[error("IBAN country code {0} is not supported")]
    UnsupportedCountry(String),
    #[error("IBAN for {country} must be {expected} characters, got {actual}")]
    WrongLength {
        country: String,
        expected: usize,
        actual: usize,
    },
    #[error("IBAN checksum is invalid")]
    InvalidChecksum,
}

/// Local field checks on a mandate draft.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("account holder name exceeds {max} characters")]
    HolderNameTooLong { max: usize },
    #[error("mandate reference {0:?} exceeds 35 characters or contains characters outside the SEPA set")]
    InvalidReference(String),
    #[error("mandate must be used for memberships, donations or both")]
    NoPurpose,
    #[error("sign date {sign_date} lies after {today}")]
    SignDateInFuture {
        sign_date: chrono::NaiveDate,
        today: chrono::NaiveDate,
    },
    #[error("BIC {0:?} is not a valid 8 or 11 character bank identifier")]
    InvalidBic(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MandateError {
    #[error(transparent)]
    Iban(#[from] IbanError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error("mandate reference {0} already exists")]
    DuplicateMandateId(String),
    #[error(
        "another mandate was activated for member {member_id} in the meantime (expected {expected:?}, found {found:?})"
    )]
    ConcurrentMandateConflict {
        member_id: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{0}")]
    NetworkOrService(String),
    #[error("mandate {0} not found")]
    NotFound(String),
    #[error("mandate {mandate_id} cannot move from {from} to {to}")]
    InvalidTransition {
        mandate_id: String,
        from: crate::mandate::MandateStatus,
        to: crate::mandate::MandateStatus,
    },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("failed to encode or decode a mandate record: {0}")]
    Codec(String),
}

impl MandateError {
    /// True when the error was raised before anything left the process.
    pub fn is_local(&self) -> bool {
        matches!(self, MandateError::Iban(_) | MandateError::Draft(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MandateError::ConcurrentMandateConflict { .. } | MandateError::NetworkOrService(_)
        )
    }
}

impl From<sled::Error> for MandateError {
    fn from(value: sled::Error) -> Self {
        MandateError::Storage(value.to_string())
    }
}

impl From<minicbor::decode::Error> for MandateError {
    fn from(value: minicbor::decode::Error) -> Self {
        MandateError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for MandateError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        MandateError::Codec(value.to_string())
    }
}
