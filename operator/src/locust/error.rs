/// Rejected load test specification.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    /// Too few worker replicas.
    #[error("worker replicas must be at least 1, got {0}")]
    Replicas(i32),
}

/// Errors produced by the event handlers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The load test specification was rejected.
    #[error("Validation error: {source}")]
    Validation {
        /// Underlying error.
        #[from]
        source: ValidationError,
    },
    /// The API server refused or failed a request.
    #[error("Kube error: {source}")]
    Kube {
        /// Underlying error.
        #[from]
        source: kube::Error,
    },
    /// An object lacked a required field.
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
    /// An owner reference did not point at a load test.
    #[error("owner reference is not a Locust reference: {0}")]
    InvalidOwner(String),
    /// A dynamic object did not decode.
    #[error("Decode error: {source}")]
    Decode {
        /// Underlying error.
        #[from]
        source: serde_json::Error,
    },
    /// Any other failure.
    #[error("App error: {source}")]
    App {
        /// Underlying error.
        #[from]
        source: anyhow::Error,
    },
}

impl Error {
    /// Reports whether redelivering the event can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } | Error::App { .. } => true,
            Error::Validation { .. }
            | Error::MissingObjectKey(_)
            | Error::InvalidOwner(_)
            | Error::Decode { .. } => false,
        }
    }
}

/// Reports whether the API server answered 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404 || resp.reason == "NotFound")
}

/// Reports whether the API server answered 403.
pub fn is_forbidden(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 403 || resp.reason == "Forbidden")
}

#[cfg(test)]
mod tests {
    use kube::error::ErrorResponse;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: "stub message".to_owned(),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn classify_api_errors() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_forbidden(&api_error(404, "NotFound")));
        assert!(is_forbidden(&api_error(403, "Forbidden")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
        assert!(!is_forbidden(&api_error(500, "InternalError")));
    }

    #[test]
    fn validation_is_not_retried() {
        let err: Error = ValidationError::Replicas(0).into();
        assert!(!err.is_retryable());
        let err: Error = api_error(500, "InternalError").into();
        assert!(err.is_retryable());
    }
}
