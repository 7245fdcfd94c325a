pub type FramecastResult<T> = Result<T, FramecastError>;

#[derive(thiserror::Error, Debug)]
pub enum FramecastError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("layer overlap: {0}")]
    Overlap(String),

    #[error("frame out of range: {0}")]
    OutOfRange(String),

    #[error("clip not initialized: {0}")]
    NotInitialized(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("unsupported resize: {0}")]
    UnsupportedResize(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FramecastError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn overlap(msg: impl Into<String>) -> Self {
        Self::Overlap(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn unsupported_operation(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    pub fn unsupported_resize(msg: impl Into<String>) -> Self {
        Self::UnsupportedResize(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            FramecastError::invalid_parameter("x")
                .to_string()
                .contains("invalid parameter:")
        );
        assert!(
            FramecastError::overlap("x")
                .to_string()
                .contains("layer overlap:")
        );
        assert!(
            FramecastError::out_of_range("x")
                .to_string()
                .contains("frame out of range:")
        );
        assert!(
            FramecastError::not_initialized("x")
                .to_string()
                .contains("clip not initialized:")
        );
        assert!(
            FramecastError::resource_exhausted("x")
                .to_string()
                .contains("resource exhausted:")
        );
        assert!(
            FramecastError::unsupported_resize("x")
                .to_string()
                .contains("unsupported resize:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = FramecastError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
