use thiserror::Error;

/// Unified error type for the balancer
#[derive(Error, Debug)]
pub enum BalancerError {
    // Store errors
    #[error("Key-value store is not available")]
    NotReady,

    #[error("Key-value store error: {0}")]
    Backend(String),

    #[error("Can't store empty input for key {key}")]
    EmptyInput { key: String },

    #[error("Stored value could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Malformed value stored at {key}")]
    Malformed { key: String },

    // Arbitration outcomes
    #[error("Domain not supported")]
    DomainNotFound,

    #[error("Unsupported user GEO")]
    GeoRejected,

    #[error("Fair use of our service for this website has been exceeded")]
    QuotaExceeded,

    #[error("Request limit already exceeded at {timestamp}")]
    QuotaAlreadyExceeded { timestamp: i64 },

    #[error("Payment required, redirect to {url}")]
    PaymentRequired { url: String },

    #[error("No proxy available for selected geo")]
    ProxyUnavailable,

    #[error("UID is missing or incorrect")]
    InvalidUid,

    #[error("Required params are missing. Please check if \"browser\", \"locale\", \"version\" are present")]
    InvalidConfigParams,

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    // Geo database
    #[error("Geo database error: {0}")]
    GeoDatabase(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for balancer operations
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Client-facing error codes
pub mod codes {
    pub const NOT_SUPPORTED_DOMAIN: u16 = 1;
    pub const NOT_SUPPORTED_GEO: u16 = 2;
    pub const REQUESTS_EXCEEDED: u16 = 3;
    pub const NOT_FOUND_PROXY: u16 = 4;
    pub const WRONG_UID: u16 = 5;
    pub const WRONG_CONFIG_PARAMS: u16 = 6;
    pub const ALREADY_EXCEEDED: u16 = 98;
    pub const NEED_PAY: u16 = 99;
    pub const OTHER_ERROR: u16 = 100;
}

impl BalancerError {
    /// Stable numeric code reported to clients
    pub fn code(&self) -> u16 {
        match self {
            BalancerError::DomainNotFound => codes::NOT_SUPPORTED_DOMAIN,
            BalancerError::GeoRejected => codes::NOT_SUPPORTED_GEO,
            BalancerError::QuotaExceeded => codes::REQUESTS_EXCEEDED,
            BalancerError::QuotaAlreadyExceeded { .. } => codes::ALREADY_EXCEEDED,
            BalancerError::PaymentRequired { .. } => codes::NEED_PAY,
            BalancerError::ProxyUnavailable => codes::NOT_FOUND_PROXY,
            BalancerError::InvalidUid => codes::WRONG_UID,
            BalancerError::InvalidConfigParams => codes::WRONG_CONFIG_PARAMS,
            _ => codes::OTHER_ERROR,
        }
    }

    /// Whether this error is a regular arbitration outcome rather than a failure
    pub fn is_outcome(&self) -> bool {
        self.code() != codes::OTHER_ERROR
    }

    /// Collapse any non-outcome error into `Unexpected`, keeping the cause text
    pub fn into_outcome(self) -> Self {
        match self {
            err if err.is_outcome() => err,
            BalancerError::Unexpected(detail) => BalancerError::Unexpected(detail),
            other => BalancerError::Unexpected(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for BalancerError {
    fn from(err: redis::RedisError) -> Self {
        BalancerError::Backend(err.to_string())
    }
}

impl From<url::ParseError> for BalancerError {
    fn from(err: url::ParseError) -> Self {
        BalancerError::InvalidConfig(err.to_string())
    }
}
