//! ID definitions for server-manager resources.

use crate::{define_id, define_row_id};

// =============================================================================
// Fleet resources
// =============================================================================

define_row_id!(TemplateId, "template");
define_row_id!(NodeId, "node");
define_row_id!(ServerId, "server");
define_row_id!(UserId, "user");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new();
        let s = id.to_string();
        let parsed: RequestId = s.parse().unwrap();
        assert_eq!(id, parsed);
        assert!(s.starts_with("req_"));
    }

    #[test]
    fn test_request_id_invalid_prefix() {
        let result: Result<RequestId, _> = "org_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_request_id_missing_separator() {
        let result: Result<RequestId, _> = "req01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_request_id_invalid_ulid() {
        let result: Result<RequestId, _> = "req_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_row_id_parses_positive_integers() {
        let id: ServerId = "42".parse().unwrap();
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_row_id_rejects_zero_negative_and_garbage() {
        for input in ["0", "-3", "abc", "1.5"] {
            let err = input.parse::<NodeId>().unwrap_err();
            assert!(
                matches!(err, crate::IdError::InvalidRowId { kind: "node", .. }),
                "{input} should be rejected"
            );
        }
        assert!("".parse::<NodeId>().unwrap_err().is_empty());
    }

    #[test]
    fn test_row_id_serializes_as_number() {
        let id = TemplateId::new(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let parsed: TemplateId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<TemplateId>("0").is_err());
    }

    #[test]
    fn test_request_id_sortable() {
        let id1 = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = RequestId::new();
        assert!(id1 < id2);
    }

    proptest! {
        #[test]
        fn row_id_display_parse_roundtrip(raw in 1i64..i64::MAX) {
            let id = UserId::new(raw);
            let parsed: UserId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
