#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No window with the given display name.
    WindowNotFound { name: String },
    /// The window exists, but with the other dimension.
    KindMismatch { name: String },
    /// Window display names are unique across both dimensions.
    DuplicateName { name: String },
    /// Empty display names are rejected.
    EmptyName,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::WindowNotFound { name } => write!(f, "no window named \"{name}\""),
            EngineError::KindMismatch { name } => {
                write!(f, "window \"{name}\" has a different dimension")
            }
            EngineError::DuplicateName { name } => {
                write!(f, "a window named \"{name}\" already exists")
            }
            EngineError::EmptyName => write!(f, "window names must not be empty"),
        }
    }
}

impl std::error::Error for EngineError {}
