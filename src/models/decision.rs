use serde::Serialize;
use tracing::error;

use super::ProxyEndpoint;
use crate::error::{codes, BalancerError};

/// Payment redirect target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub url: String,
}

/// Client-facing error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub code: u16,
    pub message: String,
}

/// Transport-facing outcome of an arbitration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Decision {
    Proxy {
        proxy: ProxyEndpoint,
        #[serde(rename = "needCache", skip_serializing_if = "is_false")]
        need_cache: bool,
    },
    Notification {
        notification: Notification,
    },
    Error {
        error: ErrorBody,
        #[serde(rename = "needCache", skip_serializing_if = "is_false")]
        need_cache: bool,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Decision {
    pub fn grant(proxy: ProxyEndpoint, need_cache: bool) -> Self {
        Decision::Proxy { proxy, need_cache }
    }

    /// Whether the transport may cache this answer until the window ends
    pub fn need_cache(&self) -> bool {
        match self {
            Decision::Proxy { need_cache, .. } | Decision::Error { need_cache, .. } => *need_cache,
            Decision::Notification { .. } => false,
        }
    }

    /// Same decision with the cache hint removed, for rendering
    pub fn without_cache_hint(self) -> Self {
        match self {
            Decision::Proxy { proxy, .. } => Decision::Proxy {
                proxy,
                need_cache: false,
            },
            Decision::Error { error, .. } => Decision::Error {
                error,
                need_cache: false,
            },
            other => other,
        }
    }

    pub fn error_code(&self) -> Option<u16> {
        match self {
            Decision::Error { error, .. } => Some(error.code),
            _ => None,
        }
    }
}

impl From<BalancerError> for Decision {
    fn from(err: BalancerError) -> Self {
        let err = err.into_outcome();
        match err {
            BalancerError::PaymentRequired { url } => Decision::Notification {
                notification: Notification { url },
            },
            // Already-exceeded is reported as plain exceeded
            BalancerError::QuotaExceeded | BalancerError::QuotaAlreadyExceeded { .. } => {
                Decision::Error {
                    error: ErrorBody {
                        code: codes::REQUESTS_EXCEEDED,
                        message: BalancerError::QuotaExceeded.to_string(),
                    },
                    need_cache: true,
                }
            }
            BalancerError::Unexpected(detail) => {
                error!(detail = %detail, "Unexpected error while arbitrating");
                Decision::Error {
                    error: ErrorBody {
                        code: codes::OTHER_ERROR,
                        message: "Unexpected error".to_string(),
                    },
                    need_cache: false,
                }
            }
            other => Decision::Error {
                error: ErrorBody {
                    code: other.code(),
                    message: other.to_string(),
                },
                need_cache: false,
            },
        }
    }
}
