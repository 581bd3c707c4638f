use silo_storage::StorageError;
use silo_types::TypesError;
use thiserror::Error;

/// Protocol failure taxonomy.
///
/// Validation and policy failures are reported to the caller and leave
/// no local state behind. Storage and transport failures are surfaced
/// after partial state is reverted. Crypto failures are logged and the
/// offending message dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Contract did not parse or failed schema validation: {0}")]
    InvalidFormat(String),

    #[error("Signature does not verify against the sender's node id")]
    InvalidSignature,

    #[error("Contract is not complete after signing")]
    Incomplete,

    #[error("No open negotiation for this data hash")]
    NotOpen,

    #[error("Sender holds no contract for this shard")]
    Unauthorized,

    #[error("Consign window is closed")]
    Timing,

    #[error("Sender is not contracted for this shard")]
    NotContracted,

    #[error("Malformed data hash key: {0}")]
    InvalidKey(String),

    #[error("Audit list is not an array of audit entries")]
    InvalidAudits,

    #[error("No audit tree stored for this renter")]
    NoTree,

    #[error("Shard has not been consigned")]
    NotFound,

    #[error("Challenge response is not a member of the audit tree")]
    ProofFailed,

    #[error("Probed peer is not addressable")]
    NotAddressable,

    #[error("Failed to load storage item: {0}")]
    LoadFailed(#[source] StorageError),

    #[error("Failed to save storage item: {0}")]
    SaveFailed(#[source] StorageError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Data channel error: {0}")]
    Channel(String),

    #[error("Tunnel gateway error: {0}")]
    Gateway(String),

    #[error("Port mapping error: {0}")]
    Mapping(String),

    #[error("Token rejected: {0}")]
    Token(String),

    #[error("No trigger registered for this source")]
    NoTrigger,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Types(#[from] TypesError),
}

impl ProtocolError {
    /// Wire reason string carried in error responses.
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::InvalidFormat(_) => "invalid-format",
            ProtocolError::InvalidSignature => "invalid-signature",
            ProtocolError::Incomplete => "incomplete",
            ProtocolError::NotOpen => "not-open",
            ProtocolError::Unauthorized => "unauthorized",
            ProtocolError::Timing => "timing",
            ProtocolError::NotContracted => "not-contracted",
            ProtocolError::InvalidKey(_) => "invalid-key",
            ProtocolError::InvalidAudits => "invalid-audits",
            ProtocolError::NoTree => "no-tree",
            ProtocolError::NotFound => "not-found",
            ProtocolError::ProofFailed => "proof-failed",
            ProtocolError::NotAddressable => "not-addressable",
            ProtocolError::LoadFailed(_) => "load-failed",
            ProtocolError::SaveFailed(_) => "save-failed",
            ProtocolError::Transport(_) => "transport-error",
            ProtocolError::Channel(_) => "channel-error",
            ProtocolError::Gateway(_) => "gateway-failed",
            ProtocolError::Mapping(_) => "mapping-failed",
            ProtocolError::Token(_) => "token-rejected",
            ProtocolError::NoTrigger => "no-trigger",
            ProtocolError::Serialization(_) => "invalid-format",
            ProtocolError::Types(_) => "invalid-format",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
