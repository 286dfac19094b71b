//! Declarative record-family schema descriptors
//!
//! The schema provider (an external collaborator) supplies one
//! RecordSchema per family at startup. The generic handler is driven
//! entirely by this descriptor plus a small hook set, replacing the
//! per-family hand-written duplication the source deployments grew.

use crate::error::{CoordError, CoordResult};
use crate::record::ConfigRecord;
use crate::types::FamilyTag;

/// One field of a family's schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as it appears in record field maps
    pub name: String,
    /// Whether every record of the family must carry this field
    pub required: bool,
}

impl FieldSpec {
    /// A required field
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// An optional field
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Declarative descriptor of one record family
#[derive(Debug, Clone)]
pub struct RecordSchema {
    /// Family this schema describes
    pub family: FamilyTag,
    /// Dependency rank: lower ranks are created first and deleted last.
    /// Fixed at registration; ties within a rank order by key.
    pub rank: u16,
    /// Declared fields
    pub fields: Vec<FieldSpec>,
    /// Field whose value names a shared resource, if the family
    /// references one (e.g. the profile a binding attaches to)
    pub reference_field: Option<String>,
}

impl RecordSchema {
    /// Create a schema with no fields declared
    pub fn new(family: FamilyTag, rank: u16) -> Self {
        Self {
            family,
            rank,
            fields: Vec::new(),
            reference_field: None,
        }
    }

    /// Builder-style field declaration
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder-style shared-resource reference declaration
    #[must_use]
    pub fn with_reference_field(mut self, name: impl Into<String>) -> Self {
        self.reference_field = Some(name.into());
        self
    }

    /// Look up a field declaration by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a record's shape against this schema
    ///
    /// Checks family tag, presence of required fields, and absence of
    /// undeclared fields. Field *values* are family business and belong
    /// to the hooks.
    pub fn validate_shape(&self, record: &ConfigRecord) -> CoordResult<()> {
        if record.key.family != self.family {
            return Err(CoordError::store(format!(
                "record {} validated against schema for family {}",
                record.key, self.family
            )));
        }
        for spec in &self.fields {
            if spec.required && !record.fields.contains_key(&spec.name) {
                return Err(CoordError::store(format!(
                    "record {} missing required field {:?}",
                    record.key, spec.name
                )));
            }
        }
        for name in record.fields.keys() {
            if self.field(name).is_none() {
                return Err(CoordError::store(format!(
                    "record {} carries undeclared field {:?}",
                    record.key, name
                )));
            }
        }
        Ok(())
    }

    /// Extract the shared-resource name a record references, if any
    pub fn referenced_resource(&self, record: &ConfigRecord) -> Option<String> {
        let field = self.reference_field.as_ref()?;
        record
            .fields
            .get(field)
            .filter(|v| v.is_programmable() && !v.value.is_empty())
            .map(|v| v.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, RecordKey};
    use crate::types::{ControllerId, DomainId};

    fn binding_schema() -> RecordSchema {
        RecordSchema::new(FamilyTag::from("binding"), 10)
            .with_field(FieldSpec::required("port"))
            .with_field(FieldSpec::optional("profile"))
            .with_reference_field("profile")
    }

    fn record_with(fields: &[(&str, &str)]) -> ConfigRecord {
        let mut rec = ConfigRecord::new(
            RecordKey::from_parts("binding", &["t1", "p1"]),
            ControllerId::from("c1"),
            DomainId::root(),
        );
        for (name, value) in fields {
            rec = rec.with_field(*name, FieldValue::valid(*value));
        }
        rec
    }

    #[test]
    fn test_shape_ok() {
        let schema = binding_schema();
        let rec = record_with(&[("port", "eth0"), ("profile", "gold")]);
        assert!(schema.validate_shape(&rec).is_ok());
    }

    #[test]
    fn test_shape_missing_required() {
        let schema = binding_schema();
        let rec = record_with(&[("profile", "gold")]);
        assert!(schema.validate_shape(&rec).is_err());
    }

    #[test]
    fn test_shape_undeclared_field() {
        let schema = binding_schema();
        let rec = record_with(&[("port", "eth0"), ("vlan", "100")]);
        assert!(schema.validate_shape(&rec).is_err());
    }

    #[test]
    fn test_referenced_resource() {
        let schema = binding_schema();
        let rec = record_with(&[("port", "eth0"), ("profile", "gold")]);
        assert_eq!(schema.referenced_resource(&rec), Some("gold".to_string()));

        let no_ref = record_with(&[("port", "eth0")]);
        assert_eq!(schema.referenced_resource(&no_ref), None);
    }
}
