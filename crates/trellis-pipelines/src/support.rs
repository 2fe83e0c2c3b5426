use trellis_core::error::{Result, TrellisError};

/// Read a state field a step depends on, treating absence as a wiring defect.
pub(crate) fn require<'a, T>(value: &'a Option<T>, step: &str, field: &str) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| TrellisError::MissingField {
        step: step.to_string(),
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_fatal() {
        let missing: Option<String> = None;
        let err = require(&missing, "draft", "schema_brief").unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("schema_brief"));
    }
}
