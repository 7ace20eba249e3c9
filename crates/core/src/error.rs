/// Result alias that carries the custom [`VibeVizError`] type.
pub type Result<T> = std::result::Result<T, VibeVizError>;

/// Common error type for the core crate.
///
/// Acquisition failures (`PermissionDenied`, `DeviceUnavailable`,
/// `DecodeError`) surface to the caller of the connect operations so the
/// host can report them. `GraphWiring` failures are recovered inside the
/// signal graph and only appear in return values from the backend layer.
#[derive(Debug, thiserror::Error)]
pub enum VibeVizError {
    /// The platform refused access to the capture device.
    #[error("microphone access was denied by the platform")]
    PermissionDenied,
    /// No usable capture or output device, or its configuration could not
    /// be negotiated.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The provided byte buffer is not decodable audio.
    #[error("could not decode audio data: {0}")]
    DecodeError(String),
    /// A platform-level node or stream connection failed.
    #[error("signal graph wiring failed: {0}")]
    GraphWiring(String),
    /// General engine error that wraps a readable message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl VibeVizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VibeVizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VibeVizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
