//! Error classification table
//!
//! Which provider error codes are recoverable depends on the provider and on
//! the kind of call that produced them ("not found" is harmless on delete and
//! fatal on read). Adapters register their codes here instead of matching on
//! them at each call site.

use crate::error::CloudError;

/// Kind of remote call that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Create,
    Read,
    Update,
    Delete,
    Action,
}

/// How the engine treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with fixed backoff
    Transient,
    /// Treat as success with an empty payload
    Recoverable,
    /// Register the subscription/namespace and resume the stage
    RegistrationRequired,
    /// Invalidate the cached client, then fail
    Connectivity,
    /// Terminate the workflow
    Fatal,
}

#[derive(Debug, Clone)]
struct ClassifierRule {
    pattern: String,
    kinds: Option<Vec<CallKind>>,
    class: ErrorClass,
}

impl ClassifierRule {
    fn matches(&self, code: &str, kind: CallKind) -> bool {
        let code_matches = match self.pattern.strip_suffix('*') {
            Some(prefix) => code.starts_with(prefix),
            None => code.eq_ignore_ascii_case(&self.pattern),
        };
        code_matches
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Ordered rule table mapping provider error codes to an [`ErrorClass`]
///
/// Rules are evaluated in insertion order; the first match wins. A pattern
/// ending in `*` matches by prefix.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule that applies to every call kind
    pub fn with_rule(mut self, pattern: impl Into<String>, class: ErrorClass) -> Self {
        self.rules.push(ClassifierRule {
            pattern: pattern.into(),
            kinds: None,
            class,
        });
        self
    }

    /// Add a rule restricted to the given call kinds
    pub fn with_rule_for(
        mut self,
        pattern: impl Into<String>,
        kinds: &[CallKind],
        class: ErrorClass,
    ) -> Self {
        self.rules.push(ClassifierRule {
            pattern: pattern.into(),
            kinds: Some(kinds.to_vec()),
            class,
        });
        self
    }

    pub fn classify(&self, error: &CloudError, kind: CallKind) -> ErrorClass {
        match error {
            CloudError::Provider { code, .. } => self
                .rules
                .iter()
                .find(|rule| rule.matches(code, kind))
                .map(|rule| rule.class)
                .unwrap_or(ErrorClass::Fatal),
            CloudError::Timeout(_) | CloudError::Io(_) => ErrorClass::Transient,
            CloudError::AuthenticationFailed(_) => ErrorClass::Connectivity,
            CloudError::ResourceNotFound(_) if kind == CallKind::Delete => ErrorClass::Recoverable,
            CloudError::ResourceAlreadyExists(_) if kind == CallKind::Create => {
                ErrorClass::Recoverable
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self, error: &CloudError, kind: CallKind) -> bool {
        self.classify(error, kind) == ErrorClass::Transient
    }

    pub fn is_recoverable(&self, error: &CloudError, kind: CallKind) -> bool {
        self.classify(error, kind) == ErrorClass::Recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new()
            .with_rule("Throttl*", ErrorClass::Transient)
            .with_rule_for("NotFound", &[CallKind::Delete], ErrorClass::Recoverable)
            .with_rule("AuthFailure", ErrorClass::Connectivity)
    }

    #[test]
    fn test_prefix_rule() {
        let err = CloudError::provider("ThrottlingException", "rate exceeded");
        assert_eq!(
            classifier().classify(&err, CallKind::Create),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_kind_restricted_rule() {
        let err = CloudError::provider("NotFound", "gone");
        let classifier = classifier();
        assert!(classifier.is_recoverable(&err, CallKind::Delete));
        assert_eq!(classifier.classify(&err, CallKind::Read), ErrorClass::Fatal);
    }

    #[test]
    fn test_non_provider_errors() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.is_transient(&CloudError::Timeout("x".into()), CallKind::Read));
        assert_eq!(
            classifier.classify(&CloudError::AuthenticationFailed("bad".into()), CallKind::Read),
            ErrorClass::Connectivity
        );
        assert!(classifier.is_recoverable(
            &CloudError::ResourceAlreadyExists("rg".into()),
            CallKind::Create
        ));
        assert_eq!(
            classifier.classify(&CloudError::StoreError("x".into()), CallKind::Create),
            ErrorClass::Fatal
        );
    }
}
