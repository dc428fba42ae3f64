//! Catalog of portal operations the request router can dispatch.
//!
//! Each entry names the automation operation, the payload fields it cannot
//! run without, and whether it answers with data or just an effect flag.
//! Every operation runs on an authenticated session.

use serde_json::Value;

use crate::error::DocketError;

/// Shape of a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Return the automation result as-is.
    Data,
    /// Return `{"success": bool}` only.
    Effect,
}

/// Static description of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub shape: ResponseShape,
}

const fn data(name: &'static str, required: &'static [&'static str]) -> OperationSpec {
    OperationSpec {
        name,
        required,
        shape: ResponseShape::Data,
    }
}

const fn effect(name: &'static str, required: &'static [&'static str]) -> OperationSpec {
    OperationSpec {
        name,
        required,
        shape: ResponseShape::Effect,
    }
}

/// Every operation exposed through the Operation API.
pub const OPERATIONS: &[OperationSpec] = &[
    // Processes
    data("list_received_processes", &[]),
    data("get_process", &["processNumber"]),
    effect("forward_process", &["processNumber", "destination"]),
    // Documents
    data("create_document", &["processNumber", "documentType", "content"]),
    // Signature blocks
    data("list_signature_blocks", &[]),
    data("list_block_documents", &["blockId"]),
    data("create_block", &["name"]),
    effect("add_to_block", &["blockId", "documentId"]),
    effect("remove_from_block", &["blockId", "documentId"]),
    effect("sign_block", &["blockId"]),
    effect("delete_block", &["blockId"]),
    // Deadlines
    data("list_deadlines", &[]),
];

/// Look up an operation by name.
pub fn find_operation(name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS.iter().find(|op| op.name == name)
}

impl OperationSpec {
    /// Check that every required field is present and non-empty.
    ///
    /// Returns the first missing field as a validation error.
    pub fn validate(&self, payload: &Value) -> Result<(), DocketError> {
        for field in self.required {
            if !is_present(payload.get(*field)) {
                return Err(DocketError::missing_field(field));
            }
        }
        Ok(())
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Collapse an automation result into the effect flag of action-only operations.
pub fn effect_flag(result: &Value) -> bool {
    match result {
        Value::Bool(flag) => *flag,
        Value::Object(map) => map.get("success").and_then(Value::as_bool).unwrap_or(true),
        _ => true,
    }
}
