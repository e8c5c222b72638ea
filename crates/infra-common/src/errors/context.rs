use crate::errors::types::Error;
use std::fmt;

/// Where an error happened
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorExt {
    /// Add context to an error
    fn context(self, ctx: ErrorContext) -> Error;

    /// Add simple context with component and operation
    fn with_context<S: Into<String>, T: Into<String>>(self, component: S, operation: T) -> Error;
}

impl ErrorExt for Error {
    fn context(self, ctx: ErrorContext) -> Error {
        match self {
            // Keep the variant for configuration failures so callers can still match on it
            Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
            Error::Internal(msg) => Error::Internal(format!("{} [{}]", msg, ctx)),
            other => Error::Custom(format!("{} [{}]", other, ctx)),
        }
    }

    fn with_context<S: Into<String>, T: Into<String>>(self, component: S, operation: T) -> Error {
        self.context(ErrorContext::new(component, operation))
    }
}

/// Context helpers on `Result`
pub trait ResultExt<T> {
    /// Attach a component/operation context to the error branch
    fn in_context<S: Into<String>, O: Into<String>>(self, component: S, operation: O) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn in_context<S: Into<String>, O: Into<String>>(self, component: S, operation: O) -> Result<T, Error> {
        self.map_err(|e| e.into().with_context(component, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_config_variant() {
        let err = Error::Config("missing file".to_string()).with_context("rt", "load");
        match err {
            Error::Config(msg) => {
                assert!(msg.contains("missing file"));
                assert!(msg.contains("in component 'rt' during operation 'load'"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_context_details_are_rendered() {
        let ctx = ErrorContext::new("dispatch", "start_view").with_details("idx 4");
        assert_eq!(
            ctx.to_string(),
            "in component 'dispatch' during operation 'start_view' (idx 4)"
        );
    }

    #[test]
    fn test_result_ext_maps_error_branch() {
        let res: Result<(), Error> = Err(Error::Logging("already set".to_string()));
        let err = res.in_context("infra", "setup_logging").unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
    }
}
