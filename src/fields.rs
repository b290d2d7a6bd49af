//! Configuration-driven input field descriptors.
//!
//! The set of registration and profile-update fields is configuration, not
//! code. Descriptors are compiled once at service construction and used to
//! validate incoming field maps per request; there is no per-request
//! reflection.

use std::collections::BTreeMap;

/// One declared input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
}

/// A validation problem with a submitted field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    Missing { field: String },
    Unexpected { field: String },
    Blank { field: String },
}

/// Compile required/optional field names into descriptors.
#[must_use]
pub fn compile(required: &[String], optional: &[String]) -> Vec<FieldSpec> {
    let mut specs: Vec<FieldSpec> = required
        .iter()
        .map(|name| FieldSpec {
            name: name.clone(),
            required: true,
        })
        .collect();
    specs.extend(optional.iter().map(|name| FieldSpec {
        name: name.clone(),
        required: false,
    }));
    specs
}

/// Validate a submitted field map against compiled descriptors.
///
/// Required fields must be present and non-blank; fields outside the
/// descriptor list are rejected.
#[must_use]
pub fn validate(specs: &[FieldSpec], input: &BTreeMap<String, String>) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    for spec in specs {
        match input.get(&spec.name) {
            None if spec.required => issues.push(FieldIssue::Missing {
                field: spec.name.clone(),
            }),
            Some(value) if spec.required && value.trim().is_empty() => {
                issues.push(FieldIssue::Blank {
                    field: spec.name.clone(),
                });
            }
            _ => {}
        }
    }

    for name in input.keys() {
        if !specs.iter().any(|spec| &spec.name == name) {
            issues.push(FieldIssue::Unexpected {
                field: name.clone(),
            });
        }
    }

    issues
}
