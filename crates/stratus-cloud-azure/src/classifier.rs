//! Azure error code table

use stratus_cloud::{CallKind, ErrorClass, ErrorClassifier};

pub const MISSING_SUBSCRIPTION_REGISTRATION: &str = "MissingSubscriptionRegistration";

/// Classification of Azure Resource Manager error codes
pub fn azure_classifier() -> ErrorClassifier {
    ErrorClassifier::new()
        .with_rule(MISSING_SUBSCRIPTION_REGISTRATION, ErrorClass::RegistrationRequired)
        .with_rule("TooManyRequests", ErrorClass::Transient)
        .with_rule("RetryableError", ErrorClass::Transient)
        .with_rule("InternalServerError", ErrorClass::Transient)
        .with_rule("ServiceUnavailable", ErrorClass::Transient)
        .with_rule("AuthenticationFailed", ErrorClass::Connectivity)
        .with_rule("InvalidAuthenticationToken*", ErrorClass::Connectivity)
        .with_rule("ExpiredAuthenticationToken", ErrorClass::Connectivity)
        .with_rule_for("Conflict", &[CallKind::Create], ErrorClass::Recoverable)
        .with_rule_for(
            "ResourceGroupNotFound",
            &[CallKind::Delete],
            ErrorClass::Recoverable,
        )
        .with_rule_for("ResourceNotFound", &[CallKind::Delete], ErrorClass::Recoverable)
}

/// Namespace named in a registration error, e.g. `Microsoft.Network`
pub fn namespace_from_message(message: &str) -> Option<&str> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    let namespace = &message[start..start + len];
    namespace.starts_with("Microsoft.").then_some(namespace)
}
