use serde::{Deserialize, Serialize};

/// A message raised while syncing that the caller may want to show.
///
/// Everything here is also logged through `tracing` at the point it is
/// raised; the copy kept in the run summary lets status surfaces present the
/// most recent problems without reading logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Feedback {
    Info(String),
    /// The run continued but something was skipped.
    Warning(String),
    Error(String),
}

impl Feedback {
    pub fn info(msg: impl Into<String>) -> Self {
        Self::Info(msg.into())
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self::Warning(msg.into())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info(msg) | Self::Warning(msg) | Self::Error(msg) => msg,
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info(msg) => write!(f, "{msg}"),
            Self::Warning(msg) => write!(f, "warning: {msg}"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_level() {
        assert_eq!(Feedback::info("msg").to_string(), "msg");
        assert_eq!(Feedback::warning("msg").to_string(), "warning: msg");
        assert_eq!(Feedback::error("msg").to_string(), "error: msg");
    }

    #[test]
    fn serializes_with_level_tag() {
        let json = serde_json::to_string(&Feedback::warning("page 2 skipped")).unwrap();
        assert_eq!(json, r#"{"level":"warning","message":"page 2 skipped"}"#);
    }
}
