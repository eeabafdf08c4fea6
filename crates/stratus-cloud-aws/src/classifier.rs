//! EC2 error code table

use stratus_cloud::{CallKind, ErrorClass, ErrorClassifier};

pub const DUPLICATE_PERMISSION: &str = "InvalidPermission.Duplicate";
pub const VOLUME_NOT_FOUND: &str = "InvalidVolume.NotFound";
pub const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

/// Classification of EC2 error codes
pub fn aws_classifier() -> ErrorClassifier {
    ErrorClassifier::new()
        .with_rule("RequestLimitExceeded", ErrorClass::Transient)
        .with_rule("Throttling*", ErrorClass::Transient)
        .with_rule("InternalError", ErrorClass::Transient)
        .with_rule("Unavailable", ErrorClass::Transient)
        .with_rule("InsufficientInstanceCapacity", ErrorClass::Transient)
        .with_rule("AuthFailure", ErrorClass::Connectivity)
        .with_rule("InvalidClientTokenId", ErrorClass::Connectivity)
        .with_rule("RequestExpired", ErrorClass::Connectivity)
        .with_rule_for(
            DUPLICATE_PERMISSION,
            &[CallKind::Create, CallKind::Action],
            ErrorClass::Recoverable,
        )
        .with_rule_for(
            VOLUME_NOT_FOUND,
            &[CallKind::Delete, CallKind::Action],
            ErrorClass::Recoverable,
        )
        .with_rule_for("IncorrectState", &[CallKind::Action], ErrorClass::Recoverable)
        .with_rule_for(INSTANCE_NOT_FOUND, &[CallKind::Delete], ErrorClass::Recoverable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_cloud::CloudError;

    #[test]
    fn test_duplicate_permission_is_success() {
        let err = CloudError::provider(DUPLICATE_PERMISSION, "rule exists");
        assert!(aws_classifier().is_recoverable(&err, CallKind::Action));
    }

    #[test]
    fn test_volume_not_found_only_ignored_on_cleanup() {
        let err = CloudError::provider(VOLUME_NOT_FOUND, "gone");
        let classifier = aws_classifier();
        assert!(classifier.is_recoverable(&err, CallKind::Delete));
        assert_eq!(classifier.classify(&err, CallKind::Read), ErrorClass::Fatal);
    }

    #[test]
    fn test_throttling_prefix() {
        let err = CloudError::provider("ThrottlingException", "slow down");
        assert!(aws_classifier().is_transient(&err, CallKind::Create));
    }
}
