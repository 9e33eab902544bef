//! Conversions from engine errors into the correlation taxonomy

use dltkpi_core::CorrelationError;

use crate::subscription::SubscriptionError;
use crate::transport::TransportError;

impl From<TransportError> for CorrelationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidConfig(msg) => CorrelationError::Configuration(msg),
            other => CorrelationError::Connection(other.to_string()),
        }
    }
}

/// Split subscription failures into retryable timeouts and terminal errors
///
/// Returns `None` for `Timeout`, which the retry loop absorbs, and the
/// correlation error that ends the loop otherwise.
pub(crate) fn terminal_error(err: SubscriptionError) -> Option<CorrelationError> {
    match err {
        SubscriptionError::Timeout { .. } => None,
        SubscriptionError::Connection(msg) => Some(CorrelationError::Connection(msg)),
        SubscriptionError::Cancelled => Some(CorrelationError::Cancelled),
    }
}
