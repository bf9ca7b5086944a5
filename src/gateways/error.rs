use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    #[error("Webhook payload invalid: {message}")]
    WebhookPayload { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    Provider {
        provider: String,
        message: String,
        status_code: Option<u16>,
        retryable: bool,
    },

    #[error("Circuit open for {gateway}")]
    CircuitOpen { gateway: String },
}

impl GatewayError {
    /// Transport-class failures count against the circuit breaker and trigger
    /// fallback to the next gateway; everything else is a caller problem.
    pub fn is_transport(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::RateLimit { .. } => true,
            GatewayError::WebhookPayload { .. } => false,
            GatewayError::Provider { retryable, .. } => *retryable,
            // Already counted when the circuit opened
            GatewayError::CircuitOpen { .. } => false,
        }
    }

    /// Whether the provider may have processed a charge despite the error.
    ///
    /// A request that timed out or died mid-flight can still have landed;
    /// an open circuit or a local validation failure never reached the
    /// network, so no charge can exist.
    pub fn may_have_charged(&self) -> bool {
        match self {
            GatewayError::Network { .. } => true,
            GatewayError::Provider { .. } => true,
            GatewayError::Validation { .. } => false,
            GatewayError::RateLimit { .. } => false,
            GatewayError::WebhookPayload { .. } => false,
            GatewayError::CircuitOpen { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(GatewayError::Network {
            message: "timeout".to_string()
        }
        .is_transport());
        assert!(GatewayError::Provider {
            provider: "paystack".to_string(),
            message: "HTTP 503".to_string(),
            status_code: Some(503),
            retryable: true,
        }
        .is_transport());
        assert!(!GatewayError::Validation {
            message: "bad".to_string(),
            field: None
        }
        .is_transport());
        assert!(!GatewayError::CircuitOpen {
            gateway: "paystack".to_string()
        }
        .is_transport());
    }

    #[test]
    fn open_circuit_cannot_have_charged() {
        assert!(GatewayError::Network {
            message: "timeout".to_string()
        }
        .may_have_charged());
        assert!(!GatewayError::CircuitOpen {
            gateway: "paystack".to_string()
        }
        .may_have_charged());
    }
}
