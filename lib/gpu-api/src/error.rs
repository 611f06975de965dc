use std::{error::Error, sync::Arc};

pub type GfxResult<T> = Result<T, GfxError>;

/// Generic error that contains all the different kinds of errors that may
/// occur when using the API
#[derive(Debug, Clone)]
pub enum GfxError {
    String(String),
    Io(Arc<std::io::Error>),
    Shader(String),
    #[cfg(windows)]
    Windows(windows::core::Error),
}

impl std::fmt::Display for GfxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GfxError::String(msg) => write!(f, "{}", msg),
            GfxError::Io(e) => e.fmt(f),
            GfxError::Shader(msg) => write!(f, "shader build failed: {}", msg),
            #[cfg(windows)]
            GfxError::Windows(e) => e.fmt(f),
        }
    }
}

impl Error for GfxError {}

impl From<&str> for GfxError {
    fn from(str: &str) -> Self {
        Self::String(str.to_string())
    }
}

impl From<String> for GfxError {
    fn from(string: String) -> Self {
        Self::String(string)
    }
}

impl From<std::io::Error> for GfxError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<shader_compiler::CompileError> for GfxError {
    fn from(error: shader_compiler::CompileError) -> Self {
        Self::Shader(error.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for GfxError {
    fn from(error: windows::core::Error) -> Self {
        Self::Windows(error)
    }
}
