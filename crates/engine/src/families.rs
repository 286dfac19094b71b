//! Representative record families
//!
//! Two families exercise the whole handler surface:
//! - **profile**: a shared resource provider (named QoS-style profiles
//!   referenced by many bindings), dependency rank 0 so profiles are
//!   created before anything referencing them and deleted last
//! - **port-binding**: interface bindings that reference a profile by
//!   name and count against it only while actually bound to a port
//!
//! Everything here is declarative schema plus two small hook impls; the
//! protocol mechanics all live in the generic SchemaHandler.

use crate::handler::{DefaultHooks, FamilyHooks, SchemaHandler};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::record::ConfigRecord;
use confsync_core::schema::{FieldSpec, RecordSchema};
use confsync_core::types::FamilyTag;
use std::sync::Arc;

/// Family tag of the profile provider family
pub fn profile_family() -> FamilyTag {
    FamilyTag::from("profile")
}

/// Family tag of the port-binding family
pub fn port_binding_family() -> FamilyTag {
    FamilyTag::from("port-binding")
}

/// Schema of the profile family
pub fn profile_schema() -> RecordSchema {
    RecordSchema::new(profile_family(), 0)
        .with_field(FieldSpec::optional("rate"))
        .with_field(FieldSpec::optional("burst"))
}

/// Schema of the port-binding family
pub fn port_binding_schema() -> RecordSchema {
    RecordSchema::new(port_binding_family(), 10)
        .with_field(FieldSpec::required("port"))
        .with_field(FieldSpec::optional("profile"))
        .with_reference_field("profile")
}

/// Hooks for the profile family: each record defines the shared
/// resource named by the last segment of its key path
#[derive(Debug, Default, Clone, Copy)]
pub struct ProfileHooks;

impl FamilyHooks for ProfileHooks {
    fn provides_resource(
        &self,
        _schema: &RecordSchema,
        record: &ConfigRecord,
    ) -> Option<String> {
        record.key.path.last().cloned()
    }

    fn validate(&self, record: &ConfigRecord) -> CoordResult<()> {
        if let Some(rate) = record.fields.get("rate") {
            if rate.is_programmable() && !rate.value.is_empty() && rate.value.parse::<u64>().is_err()
            {
                return Err(CoordError::store(format!(
                    "profile {} has non-numeric rate {:?}",
                    record.key, rate.value
                )));
            }
        }
        Ok(())
    }
}

/// Handler for the profile family
pub fn profile_handler() -> Arc<SchemaHandler> {
    Arc::new(SchemaHandler::new(profile_schema(), Arc::new(ProfileHooks)))
}

/// Handler for the port-binding family
///
/// The default hooks suffice: the reference field is declared in the
/// schema and binding is flag-driven.
pub fn port_binding_handler() -> Arc<SchemaHandler> {
    Arc::new(SchemaHandler::new(
        port_binding_schema(),
        Arc::new(DefaultHooks),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConfigServiceHandler;
    use confsync_core::record::{FieldValue, RecordKey};
    use confsync_core::types::{ControllerId, DomainId};

    fn profile_record(name: &str, rate: &str) -> ConfigRecord {
        ConfigRecord::new(
            RecordKey::from_parts("profile", &[name]),
            ControllerId::from("c1"),
            DomainId::root(),
        )
        .with_field("rate", FieldValue::valid(rate))
    }

    #[test]
    fn test_profile_provides_its_key_name() {
        let handler = profile_handler();
        let record = profile_record("gold", "1000");
        assert_eq!(handler.provided_resource(&record), Some("gold".to_string()));
    }

    #[test]
    fn test_profile_rate_must_be_numeric() {
        let hooks = ProfileHooks;
        assert!(hooks.validate(&profile_record("gold", "1000")).is_ok());
        assert!(hooks.validate(&profile_record("gold", "fast")).is_err());
    }

    #[test]
    fn test_ranks_order_profiles_first() {
        assert!(profile_handler().rank() < port_binding_handler().rank());
    }
}
