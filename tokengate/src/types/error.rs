use std::{error::Error, fmt::Display};

/// Unified error type for the policy enforcement engine.
///
/// Two families live here. The guard taxonomy variants carry fixed
/// numeric codes that clients match on, so their order, codes and
/// messages must never change. The remaining variants cover the
/// engine's ambient failure modes (storage, serialization, validation)
/// and follow the context/source convention used throughout.
#[derive(Debug)]
pub enum TokenGateError {
    /// A mint does not satisfy the constraints of the requested
    /// operation (wrong supply, wrong decimals, mismatched binding).
    InvalidMint,

    /// The provided collector account is not the one recorded on the
    /// governing ruleset or policy.
    InvalidCollector,

    /// The signer is not the recorded authority of the record it is
    /// trying to mutate.
    InvalidAuthority,

    /// A mint manager record does not match the mint it was presented
    /// with.
    InvalidMintManager,

    /// The holder token account fails its constraints (wrong owner,
    /// wrong mint, wrong amount, unexpected delegate).
    InvalidHolderTokenAccount,

    /// The target token account of a transfer or mint does not resolve
    /// to a usable account.
    InvalidTargetTokenAccount,

    /// The token account presented for closing is not closable by the
    /// signer.
    InvalidCloseTokenAccount,

    /// A ruleset record does not match the mint manager binding.
    InvalidRuleset,

    /// Balance capture was invoked out of order or against a
    /// mismatched batch.
    InvalidPreTransferInstruction,

    /// Balance reconciliation was invoked out of order or against a
    /// mismatched batch.
    InvalidPostTransferInstruction,

    /// An invoked program or participant appears in the ruleset's
    /// disallowed addresses.
    ProgramDisallowed,

    /// The ruleset carries a non-empty allow-list and an invoked
    /// program is absent from it.
    ProgramNotAllowed,

    /// A captured participant was not declared by the batch.
    UnknownAccount,

    /// A declared participant could not be resolved at capture or
    /// reconcile time.
    AccountNotFound,

    /// The mint state is locked and the operation requires it
    /// unlocked.
    MintStateLocked,

    /// The signer is not permitted to take or release the lock.
    InvalidLockedBy,

    /// Storage-related errors from the backing record store.
    Storage {
        context: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// Serialization/deserialization errors.
    Serialization {
        context: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// Validation errors for input, parameters, or record state.
    Validation {
        context: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// An operation was attempted without proper authorization.
    Unauthorized {
        context: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// A referenced entity does not exist.
    NotFound {
        entity: String,
        details: Option<String>,
    },

    /// A transfer or fee collection would spend more than is
    /// available.
    InsufficientBalance {
        mint: String,
        available: u64,
        requested: u64,
    },

    /// A policy rule tree evaluated to false for the attempted action.
    PolicyViolation { policy: String, message: String },

    /// A policy or ruleset failed its construction-time validation.
    InvalidPolicyCreation { context: String },

    /// A dynamic royalty schedule failed its construction-time
    /// validation.
    InvalidDynamicRoyalty { context: String },

    /// Checked arithmetic overflowed during royalty interpolation or
    /// balance accounting.
    NumericalOverflow,
}

impl TokenGateError {
    /// Fixed numeric code for the guard taxonomy, preserved bit-for-bit
    /// for client compatibility. Ambient variants have no code.
    pub fn code(&self) -> Option<u32> {
        match self {
            TokenGateError::InvalidMint => Some(6000),
            TokenGateError::InvalidCollector => Some(6001),
            TokenGateError::InvalidAuthority => Some(6002),
            TokenGateError::InvalidMintManager => Some(6003),
            TokenGateError::InvalidHolderTokenAccount => Some(6004),
            TokenGateError::InvalidTargetTokenAccount => Some(6005),
            TokenGateError::InvalidCloseTokenAccount => Some(6006),
            TokenGateError::InvalidRuleset => Some(6007),
            TokenGateError::InvalidPreTransferInstruction => Some(6008),
            TokenGateError::InvalidPostTransferInstruction => Some(6009),
            TokenGateError::ProgramDisallowed => Some(6010),
            TokenGateError::ProgramNotAllowed => Some(6011),
            TokenGateError::UnknownAccount => Some(6012),
            TokenGateError::AccountNotFound => Some(6013),
            _ => None,
        }
    }

    /// Creates a new storage error
    pub fn storage<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        TokenGateError::Storage {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
        }
    }

    /// Creates a new serialization error
    pub fn serialization<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        TokenGateError::Serialization {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
        }
    }

    /// Creates a new validation error
    pub fn validation<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        TokenGateError::Validation {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
        }
    }

    /// Creates a new unauthorized access error
    pub fn unauthorized<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        TokenGateError::Unauthorized {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
        }
    }

    /// Creates a new "not found" error
    pub fn not_found(entity: impl Into<String>, details: Option<impl Into<String>>) -> Self {
        TokenGateError::NotFound {
            entity: entity.into(),
            details: details.map(|d| d.into()),
        }
    }

    /// Creates a new insufficient balance error
    pub fn insufficient_balance(mint: String, available: u64, requested: u64) -> Self {
        TokenGateError::InsufficientBalance {
            mint,
            available,
            requested,
        }
    }

    /// Creates a new policy violation error
    pub fn policy_violation(policy: String, message: impl Into<String>) -> Self {
        TokenGateError::PolicyViolation {
            policy,
            message: message.into(),
        }
    }

    /// Creates a new invalid policy creation error
    pub fn invalid_policy_creation(context: impl Into<String>) -> Self {
        TokenGateError::InvalidPolicyCreation {
            context: context.into(),
        }
    }

    /// Creates a new invalid dynamic royalty error
    pub fn invalid_dynamic_royalty(context: impl Into<String>) -> Self {
        TokenGateError::InvalidDynamicRoyalty {
            context: context.into(),
        }
    }
}

impl Display for TokenGateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenGateError::InvalidMint => write!(f, "Invalid mint"),
            TokenGateError::InvalidCollector => write!(f, "Invalid collector address"),
            TokenGateError::InvalidAuthority => write!(f, "Invalid authority address"),
            TokenGateError::InvalidMintManager => write!(f, "Invalid mint manager"),
            TokenGateError::InvalidHolderTokenAccount => {
                write!(f, "Invalid holder token account")
            }
            TokenGateError::InvalidTargetTokenAccount => {
                write!(f, "Invalid target token account")
            }
            TokenGateError::InvalidCloseTokenAccount => {
                write!(f, "Invalid token account to close")
            }
            TokenGateError::InvalidRuleset => write!(f, "Invalid ruleset"),
            TokenGateError::InvalidPreTransferInstruction => {
                write!(f, "Invalid pre transfer instruction")
            }
            TokenGateError::InvalidPostTransferInstruction => {
                write!(f, "Invalid post transfer instruction")
            }
            TokenGateError::ProgramDisallowed => {
                write!(f, "Disallowed program included in transfer")
            }
            TokenGateError::ProgramNotAllowed => {
                write!(f, "Program not allowed in allowed programs to transfer")
            }
            TokenGateError::UnknownAccount => write!(f, "Unknown account found in instruction"),
            TokenGateError::AccountNotFound => write!(f, "Account not found in instruction"),
            TokenGateError::MintStateLocked => write!(f, "Mint state is locked"),
            TokenGateError::InvalidLockedBy => write!(f, "Invalid locked by address"),
            TokenGateError::Storage { context, .. } => write!(f, "Storage error: {}", context),
            TokenGateError::Serialization { context, .. } => {
                write!(f, "Serialization error: {}", context)
            }
            TokenGateError::Validation { context, .. } => {
                write!(f, "Validation error: {}", context)
            }
            TokenGateError::Unauthorized { context, .. } => {
                write!(f, "Unauthorized: {}", context)
            }
            TokenGateError::NotFound { entity, details } => match details {
                Some(details) => write!(f, "{} not found: {}", entity, details),
                None => write!(f, "{} not found", entity),
            },
            TokenGateError::InsufficientBalance {
                mint,
                available,
                requested,
            } => write!(
                f,
                "Insufficient balance for mint {}: available {}, requested {}",
                mint, available, requested
            ),
            TokenGateError::PolicyViolation { policy, message } => {
                write!(f, "Policy {} violation: {}", policy, message)
            }
            TokenGateError::InvalidPolicyCreation { context } => {
                write!(f, "Invalid policy creation: {}", context)
            }
            TokenGateError::InvalidDynamicRoyalty { context } => {
                write!(f, "Invalid dynamic royalty: {}", context)
            }
            TokenGateError::NumericalOverflow => write!(f, "Numerical overflow"),
        }
    }
}

impl Error for TokenGateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TokenGateError::Storage { source, .. }
            | TokenGateError::Serialization { source, .. }
            | TokenGateError::Validation { source, .. }
            | TokenGateError::Unauthorized { source, .. } => source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn Error + 'static)),
            _ => None,
        }
    }
}
