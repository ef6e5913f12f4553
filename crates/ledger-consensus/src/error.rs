use core::fmt;

/// Stable, symbolic consensus reason codes. These are the only detail that
/// crosses the public API boundary; `ChainError::msg` carries operator-facing
/// context that is logged, not matched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    BadPow,
    BadMerkle,
    BadTime,
    BadCoinbase,
    BadSigops,
    BadScript,
    BadTx,
    Duplicate,
    PrematureSpend,

    MissingInputs,
    PolicyReject,
    ReorgTooDeep,
    StorageIo,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadPow => "BAD_POW",
            ErrorCode::BadMerkle => "BAD_MERKLE",
            ErrorCode::BadTime => "BAD_TIME",
            ErrorCode::BadCoinbase => "BAD_COINBASE",
            ErrorCode::BadSigops => "BAD_SIGOPS",
            ErrorCode::BadScript => "BAD_SCRIPT",
            ErrorCode::BadTx => "BAD_TX",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::PrematureSpend => "PREMATURE_SPEND",

            ErrorCode::MissingInputs => "MISSING_INPUTS",
            ErrorCode::PolicyReject => "POLICY_REJECT",
            ErrorCode::ReorgTooDeep => "REORG_TOO_DEEP",
            ErrorCode::StorageIo => "STORAGE_IO",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// True for the `BAD_CONSENSUS` family of sub-reasons (everything except
    /// the top-level kinds that are not themselves consensus violations).
    pub fn is_consensus(self) -> bool {
        !matches!(
            self,
            ErrorCode::MissingInputs
                | ErrorCode::PolicyReject
                | ErrorCode::ReorgTooDeep
                | ErrorCode::StorageIo
                | ErrorCode::Internal
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainError {
    pub code: ErrorCode,
    pub msg: String,
}

impl ChainError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{}", self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code.as_str(), self.msg)
        }
    }
}

impl std::error::Error for ChainError {}
