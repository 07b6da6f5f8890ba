use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Link is down: {0}")]
    LinkDown(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("CRC checksum mismatch (expected 0x{expected:04X}, got 0x{received:04X})")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Device exception: function 0x{function:02X}, code 0x{code:02X}")]
    Exception { function: u8, code: u8 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Errors a polling loop should ride out with a plain backoff. Anything
    /// else means the link itself is suspect and gets torn down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout
                | GatewayError::Protocol(_)
                | GatewayError::CrcMismatch { .. }
                | GatewayError::Exception { .. }
                | GatewayError::Decode(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => GatewayError::Timeout,
            _ => GatewayError::Transport(format!("IO error: {}", err)),
        }
    }
}

impl From<serialport::Error> for GatewayError {
    fn from(err: serialport::Error) -> Self {
        GatewayError::Transport(format!("Serial port error: {}", err))
    }
}

impl From<rumqttc::ClientError> for GatewayError {
    fn from(err: rumqttc::ClientError) -> Self {
        GatewayError::Transport(format!("MQTT client error: {}", err))
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(format!("TOML error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err: GatewayError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, GatewayError::Timeout));
        assert!(err.is_transient());
    }

    #[test]
    fn test_transport_errors_are_not_transient() {
        let err: GatewayError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert!(!err.is_transient());
    }
}
