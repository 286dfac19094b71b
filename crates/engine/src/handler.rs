//! Per-record-family configuration service handlers
//!
//! A ConfigServiceHandler encapsulates everything family-specific the
//! coordinator needs at each phase: capability validation, diff
//! computation, forward/reverse application, reference-count upkeep,
//! and shared-resource rename propagation.
//!
//! Instead of one hand-written handler per family, a single generic
//! SchemaHandler is driven by the family's declarative RecordSchema plus
//! a small FamilyHooks implementation. Most families ship with the
//! default hooks; the ones that define shared resources (profiles) or
//! have extra value rules override the relevant hook only.

use confsync_concurrency::{ledger::ResourcePresence, RefCountLedger};
use confsync_core::diff::{DiffEntry, DiffOp, OpFilter};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::phase::AuditType;
use confsync_core::record::{ConfigRecord, ConfigStatus, RecordFlags};
use confsync_core::schema::RecordSchema;
use confsync_core::traits::{CapabilityTable, SnapshotBackend};
use confsync_core::types::{ControllerId, FamilyTag, Scope, SessionId};
use confsync_core::view::{RecordFilter, ViewName};
use confsync_store::{DiffEngine, DiffSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a handler needs to act within one session
#[derive(Clone)]
pub struct HandlerContext {
    /// The snapshot backend views live in
    pub backend: Arc<dyn SnapshotBackend>,
    /// The shared-resource ledger
    pub ledger: Arc<RefCountLedger>,
    /// The diff engine with the registered rank table
    pub diff: Arc<DiffEngine>,
    /// Session the work belongs to
    pub session: SessionId,
    /// Scope the session owns
    pub scope: Scope,
    /// Whether applications stage reference-count deltas
    ///
    /// Commit sessions count; audit corrections re-apply configuration
    /// the committed view already accounts for, so they do not.
    pub refcounting: bool,
}

/// Outcome of a rename-propagation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameReport {
    /// References rewritten by this pass
    pub rewritten: usize,
    /// Records already carrying the new name (prior run or no-op)
    pub already_current: usize,
}

/// Family-specific behavior injected into the generic handler
///
/// Every method has a schema-driven default; families override only
/// what deviates.
pub trait FamilyHooks: Send + Sync {
    /// Shared resource a record references, if any
    fn shared_resource(&self, schema: &RecordSchema, record: &ConfigRecord) -> Option<String> {
        schema.referenced_resource(record)
    }

    /// Shared resource a record defines, if this family is a provider
    fn provides_resource(&self, _schema: &RecordSchema, _record: &ConfigRecord) -> Option<String> {
        None
    }

    /// Whether the record is operationally bound (counts references)
    ///
    /// A record merely referencing a resource without being bound never
    /// changes its count.
    fn is_actively_bound(&self, record: &ConfigRecord) -> bool {
        record.flags.is_actively_bound()
    }

    /// Family-specific value validation beyond schema shape
    ///
    /// # Errors
    /// Whatever the family considers an invalid record.
    fn validate(&self, _record: &ConfigRecord) -> CoordResult<()> {
        Ok(())
    }

    /// Rewrite a record's shared-resource reference to a new name
    fn rewrite_resource(
        &self,
        schema: &RecordSchema,
        record: &ConfigRecord,
        new_name: &str,
    ) -> ConfigRecord {
        let mut out = record.clone();
        if let Some(field) = &schema.reference_field {
            if let Some(value) = out.fields.get_mut(field) {
                value.value = new_name.to_string();
            }
        }
        out
    }
}

/// Hooks with every default: schema-declared reference field, flag-based
/// binding, no provided resources, no extra validation
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl FamilyHooks for DefaultHooks {}

/// Per-family plugin called by the coordinator at each phase
pub trait ConfigServiceHandler: Send + Sync {
    /// Family this handler serves
    fn family(&self) -> &FamilyTag;

    /// Dependency rank (lower = created earlier, deleted later)
    fn rank(&self) -> u16;

    /// Check that a controller supports every programmable field
    ///
    /// # Errors
    /// `NotSupportedByController` naming the first unsupported field.
    fn validate_capability(
        &self,
        caps: &dyn CapabilityTable,
        controller: &ControllerId,
        op: DiffOp,
        record: &ConfigRecord,
    ) -> CoordResult<()>;

    /// Ordered diff of this family's records between two views
    ///
    /// # Errors
    /// Backend read failures.
    fn compute_diff(
        &self,
        cx: &HandlerContext,
        from: &ViewName,
        to: &ViewName,
        ops: OpFilter,
    ) -> CoordResult<DiffSet>;

    /// Vote-stage semantic validation of a computed diff
    ///
    /// Registers resources the diff's creates provide (returned so the
    /// session can unwind them on abort) and checks every referenced
    /// resource exists.
    ///
    /// # Errors
    /// `ResourceNotFound` for a dangling reference; family validation
    /// failures.
    fn semantic_validate(&self, cx: &HandlerContext, set: &DiffSet) -> CoordResult<Vec<String>>;

    /// Reference-count deltas applying this entry would stage
    fn reference_deltas(&self, entry: &DiffEntry) -> Vec<(String, i64)>;

    /// Shared resource a record defines, if any
    fn provided_resource(&self, record: &ConfigRecord) -> Option<String>;

    /// Apply one entry forward: stage ledger deltas, then write the
    /// target mirror view
    ///
    /// The ledger adjustment happens before the write; if the ledger
    /// rejects, nothing is written. If the write fails, the staged
    /// deltas are rolled back.
    ///
    /// # Errors
    /// `ResourceNotFound`, `WouldGoNegative`, backend failures.
    fn apply_forward(&self, cx: &HandlerContext, entry: &DiffEntry) -> CoordResult<()>;

    /// Undo one forward-applied entry's view effects
    ///
    /// Ledger deltas are speculative and die with the session's discard;
    /// reverse application restores the mirror view only.
    ///
    /// # Errors
    /// Backend failures.
    fn apply_reverse(&self, cx: &HandlerContext, entry: &DiffEntry) -> CoordResult<()>;

    /// Stage the count change for one record, respecting the
    /// conditional-counting rule
    ///
    /// Only records whose flags mark them actively bound change a
    /// count; placeholder references never do.
    ///
    /// # Errors
    /// `WouldGoNegative` on underflow.
    fn update_ref_counts(
        &self,
        cx: &HandlerContext,
        record: &ConfigRecord,
        op: DiffOp,
    ) -> CoordResult<()>;

    /// Rewrite every reference to a renamed shared resource
    ///
    /// Idempotent and restartable: records already carrying the new
    /// name are skipped, and committed counts are recomputed from the
    /// records themselves, so a crash between records is healed by
    /// re-running with the same arguments.
    ///
    /// # Errors
    /// Backend failures.
    fn rename_propagate(
        &self,
        cx: &HandlerContext,
        old_name: &str,
        new_name: &str,
    ) -> CoordResult<RenameReport>;

    /// Whether a record participates in an audit of the given type
    fn audit_relevant(&self, record: &ConfigRecord, audit_type: AuditType) -> bool;
}

/// Generic schema-driven handler
///
/// All family behavior flows from the RecordSchema descriptor and the
/// injected hooks; no family re-implements the protocol mechanics.
pub struct SchemaHandler {
    schema: RecordSchema,
    hooks: Arc<dyn FamilyHooks>,
}

impl SchemaHandler {
    /// Create a handler from a schema and hooks
    pub fn new(schema: RecordSchema, hooks: Arc<dyn FamilyHooks>) -> Self {
        Self { schema, hooks }
    }

    /// The schema driving this handler
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn family_filter(&self, scope: &Scope) -> RecordFilter {
        RecordFilter::family(self.schema.family.clone()).in_scope(scope.clone())
    }

    fn mirror_of(record: &ConfigRecord) -> ViewName {
        ViewName::ControllerMirror(record.owner_controller.clone())
    }

    /// Resource reference of a record, counted only when bound
    fn bound_reference(&self, record: &ConfigRecord) -> Option<String> {
        if self.hooks.is_actively_bound(record) {
            self.hooks.shared_resource(&self.schema, record)
        } else {
            None
        }
    }

    fn stage_deltas(&self, cx: &HandlerContext, entry: &DiffEntry) -> CoordResult<usize> {
        let controller = &entry.effective().owner_controller;
        let deltas = self.reference_deltas(entry);
        for (i, (resource, delta)) in deltas.iter().enumerate() {
            if let Err(err) =
                cx.ledger
                    .adjust(cx.session, resource.clone(), controller, &cx.scope, *delta)
            {
                // Unwind the deltas staged so far for this entry.
                self.unstage_deltas(cx, controller, &deltas[..i]);
                return Err(err);
            }
        }
        Ok(deltas.len())
    }

    fn unstage_deltas(&self, cx: &HandlerContext, controller: &ControllerId, deltas: &[(String, i64)]) {
        for (resource, delta) in deltas {
            if let Err(err) =
                cx.ledger
                    .adjust(cx.session, resource.clone(), controller, &cx.scope, -delta)
            {
                warn!(
                    target: "confsync::handler",
                    resource = %resource,
                    error = %err,
                    "Failed to unwind staged delta"
                );
            }
        }
    }
}

impl ConfigServiceHandler for SchemaHandler {
    fn family(&self) -> &FamilyTag {
        &self.schema.family
    }

    fn rank(&self) -> u16 {
        self.schema.rank
    }

    fn validate_capability(
        &self,
        caps: &dyn CapabilityTable,
        controller: &ControllerId,
        op: DiffOp,
        record: &ConfigRecord,
    ) -> CoordResult<()> {
        let allowed = caps
            .allowed_fields(controller, &self.schema.family, op)
            .unwrap_or_default();
        for (name, _) in record.programmable_fields() {
            if !allowed.contains(name) {
                return Err(CoordError::NotSupportedByController {
                    controller: controller.clone(),
                    family: self.schema.family.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn compute_diff(
        &self,
        cx: &HandlerContext,
        from: &ViewName,
        to: &ViewName,
        ops: OpFilter,
    ) -> CoordResult<DiffSet> {
        let filter = self.family_filter(&cx.scope);
        let mut set = cx.diff.compute(cx.backend.as_ref(), from, to, &filter, ops)?;
        // Idempotence guard: a diff that changes nothing observable is
        // not a diff. The engine already ignores apply status, so this
        // only fires on malformed updates, but the invariant is cheap to
        // hold here where entries are born.
        set.retain(|entry| match (&entry.old, &entry.new) {
            (Some(old), Some(new)) => !old.same_config(new),
            _ => true,
        });
        Ok(set)
    }

    fn semantic_validate(&self, cx: &HandlerContext, set: &DiffSet) -> CoordResult<Vec<String>> {
        // Resources provided by in-session creates become visible to
        // semantic checks immediately, so a binding created alongside
        // its profile validates.
        let mut provided = Vec::new();
        for entry in set.entries() {
            if entry.op == DiffOp::Create {
                if let Some(new) = &entry.new {
                    if let Some(resource) = self.hooks.provides_resource(&self.schema, new) {
                        if cx.ledger.semantic_check(&resource, &cx.scope)
                            == ResourcePresence::NotFound
                        {
                            cx.ledger.register_resource(resource.clone(), cx.scope.clone());
                            provided.push(resource);
                        }
                    }
                }
            }
        }

        for entry in set.entries() {
            if entry.op == DiffOp::Delete {
                continue;
            }
            let record = entry
                .new
                .as_ref()
                .ok_or_else(|| CoordError::store("create/update entry without new record"))?;
            self.schema.validate_shape(record)?;
            self.hooks.validate(record)?;
            if let Some(resource) = self.hooks.shared_resource(&self.schema, record) {
                if cx.ledger.semantic_check(&resource, &cx.scope) == ResourcePresence::NotFound {
                    return Err(CoordError::ResourceNotFound {
                        resource,
                        scope: cx.scope.clone(),
                    });
                }
            }
        }
        Ok(provided)
    }

    fn reference_deltas(&self, entry: &DiffEntry) -> Vec<(String, i64)> {
        match entry.op {
            DiffOp::Create => entry
                .new
                .as_ref()
                .and_then(|r| self.bound_reference(r))
                .map(|res| vec![(res, 1)])
                .unwrap_or_default(),
            DiffOp::Delete => entry
                .old
                .as_ref()
                .and_then(|r| self.bound_reference(r))
                .map(|res| vec![(res, -1)])
                .unwrap_or_default(),
            DiffOp::Update => {
                let old_ref = entry.old.as_ref().and_then(|r| self.bound_reference(r));
                let new_ref = entry.new.as_ref().and_then(|r| self.bound_reference(r));
                if old_ref == new_ref {
                    return Vec::new();
                }
                let mut deltas = Vec::new();
                if let Some(res) = old_ref {
                    deltas.push((res, -1));
                }
                if let Some(res) = new_ref {
                    deltas.push((res, 1));
                }
                deltas
            }
        }
    }

    fn provided_resource(&self, record: &ConfigRecord) -> Option<String> {
        self.hooks.provides_resource(&self.schema, record)
    }

    fn apply_forward(&self, cx: &HandlerContext, entry: &DiffEntry) -> CoordResult<()> {
        match entry.op {
            DiffOp::Create | DiffOp::Update => {
                let record = entry
                    .new
                    .as_ref()
                    .ok_or_else(|| CoordError::store("create/update entry without new record"))?;
                if cx.refcounting {
                    if let Some(resource) = self.hooks.shared_resource(&self.schema, record) {
                        if cx.ledger.semantic_check(&resource, &cx.scope)
                            == ResourcePresence::NotFound
                        {
                            return Err(CoordError::ResourceNotFound {
                                resource,
                                scope: cx.scope.clone(),
                            });
                        }
                    }
                }
                let staged = if cx.refcounting {
                    match entry.op {
                        // A changed or dropped binding transfers between
                        // counters; a create is the plain conditional count.
                        DiffOp::Update => self.stage_deltas(cx, entry)?,
                        _ => {
                            self.update_ref_counts(cx, record, entry.op)?;
                            self.reference_deltas(entry).len()
                        }
                    }
                } else {
                    0
                };

                let mut applied = record.clone();
                applied.status = ConfigStatus::applied();
                if let Err(err) = cx.backend.write(&Self::mirror_of(record), vec![applied]) {
                    if staged > 0 {
                        let deltas = self.reference_deltas(entry);
                        self.unstage_deltas(cx, &record.owner_controller, &deltas);
                    }
                    return Err(err);
                }
                debug!(
                    target: "confsync::handler",
                    family = %self.schema.family,
                    key = %record.key,
                    op = ?entry.op,
                    "Entry applied"
                );
                Ok(())
            }
            DiffOp::Delete => {
                let record = entry
                    .old
                    .as_ref()
                    .ok_or_else(|| CoordError::store("delete entry without old record"))?;
                let staged = if cx.refcounting {
                    self.update_ref_counts(cx, record, DiffOp::Delete)?;
                    self.reference_deltas(entry).len()
                } else {
                    0
                };
                if let Err(err) = cx
                    .backend
                    .remove(&Self::mirror_of(record), &[record.key.clone()])
                {
                    if staged > 0 {
                        let deltas = self.reference_deltas(entry);
                        self.unstage_deltas(cx, &record.owner_controller, &deltas);
                    }
                    return Err(err);
                }
                debug!(
                    target: "confsync::handler",
                    family = %self.schema.family,
                    key = %record.key,
                    "Entry deleted"
                );
                Ok(())
            }
        }
    }

    fn apply_reverse(&self, cx: &HandlerContext, entry: &DiffEntry) -> CoordResult<()> {
        match entry.op {
            DiffOp::Create => {
                let record = entry
                    .new
                    .as_ref()
                    .ok_or_else(|| CoordError::store("create entry without new record"))?;
                cx.backend
                    .remove(&Self::mirror_of(record), &[record.key.clone()])
            }
            DiffOp::Update | DiffOp::Delete => {
                let record = entry
                    .old
                    .as_ref()
                    .ok_or_else(|| CoordError::store("update/delete entry without old record"))?;
                let mut restored = record.clone();
                restored.status = ConfigStatus::applied();
                cx.backend.write(&Self::mirror_of(record), vec![restored])
            }
        }
    }

    fn update_ref_counts(
        &self,
        cx: &HandlerContext,
        record: &ConfigRecord,
        op: DiffOp,
    ) -> CoordResult<()> {
        if !cx.refcounting {
            return Ok(());
        }
        // Conditional counting: unbound placeholder records never touch
        // a count, no matter what they reference.
        let Some(resource) = self.bound_reference(record) else {
            return Ok(());
        };
        let delta = match op {
            DiffOp::Create => 1,
            DiffOp::Delete => -1,
            DiffOp::Update => 0,
        };
        if delta == 0 {
            return Ok(());
        }
        cx.ledger
            .adjust(cx.session, resource, &record.owner_controller, &cx.scope, delta)
    }

    fn rename_propagate(
        &self,
        cx: &HandlerContext,
        old_name: &str,
        new_name: &str,
    ) -> CoordResult<RenameReport> {
        if self.schema.reference_field.is_none() {
            return Ok(RenameReport::default());
        }
        // Make the new name resolvable before any record is rewritten;
        // registration is idempotent across restarted runs.
        cx.ledger.register_resource(new_name, cx.scope.clone());

        let filter = self.family_filter(&cx.scope);
        let mut report = RenameReport::default();
        let views = [ViewName::Committed, ViewName::Working];

        for view in &views {
            for record in cx.backend.read(view, &filter)? {
                match self.hooks.shared_resource(&self.schema, &record) {
                    Some(res) if res == old_name => {
                        let mut rewritten =
                            self.hooks.rewrite_resource(&self.schema, &record, new_name);
                        rewritten.flags = rewritten.flags.with(RecordFlags::RENAME_PENDING);
                        cx.backend.write(view, vec![rewritten])?;
                        report.rewritten += 1;
                    }
                    Some(res) if res == new_name => {
                        report.already_current += 1;
                    }
                    _ => {}
                }
            }
        }

        // Completion pass: clear the pending flag on everything that now
        // carries the new name.
        for view in &views {
            for record in cx.backend.read(view, &filter)? {
                if record.flags.contains(RecordFlags::RENAME_PENDING)
                    && self.hooks.shared_resource(&self.schema, &record).as_deref()
                        == Some(new_name)
                {
                    let mut done = record.clone();
                    done.flags = done.flags.without(RecordFlags::RENAME_PENDING);
                    cx.backend.write(view, vec![done])?;
                }
            }
        }

        // Recount committed bound references from the records themselves.
        // A crash anywhere above leaves counts repairable by re-running;
        // the ledger is never the source of truth mid-rename.
        let committed = cx.backend.read(&ViewName::Committed, &filter)?;
        let mut new_counts: BTreeMap<ControllerId, u64> = BTreeMap::new();
        let mut old_counts: BTreeMap<ControllerId, u64> = BTreeMap::new();
        for record in &committed {
            if let Some(res) = self.bound_reference(record) {
                if res == new_name {
                    *new_counts.entry(record.owner_controller.clone()).or_default() += 1;
                } else if res == old_name {
                    *old_counts.entry(record.owner_controller.clone()).or_default() += 1;
                }
            }
        }
        for controller in cx.ledger.controllers_with_count(old_name, &cx.scope) {
            old_counts.entry(controller).or_default();
        }
        for controller in cx.ledger.controllers_with_count(new_name, &cx.scope) {
            new_counts.entry(controller).or_default();
        }
        for (controller, count) in &new_counts {
            cx.ledger
                .reconcile_count(new_name, controller, &cx.scope, *count);
        }
        for (controller, count) in &old_counts {
            cx.ledger
                .reconcile_count(old_name, controller, &cx.scope, *count);
        }

        debug!(
            target: "confsync::handler",
            family = %self.schema.family,
            old = old_name,
            new = new_name,
            rewritten = report.rewritten,
            "Rename propagated"
        );
        Ok(report)
    }

    fn audit_relevant(&self, record: &ConfigRecord, audit_type: AuditType) -> bool {
        match audit_type {
            AuditType::Full => true,
            AuditType::Simplified => self.hooks.is_actively_bound(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::record::{FieldValue, RecordKey};
    use confsync_core::schema::FieldSpec;
    use confsync_core::types::DomainId;
    use std::collections::BTreeSet;

    fn binding_schema() -> RecordSchema {
        RecordSchema::new(FamilyTag::from("binding"), 10)
            .with_field(FieldSpec::required("port"))
            .with_field(FieldSpec::optional("profile"))
            .with_reference_field("profile")
    }

    fn handler() -> SchemaHandler {
        SchemaHandler::new(binding_schema(), Arc::new(DefaultHooks))
    }

    fn record(name: &str, profile: Option<&str>, bound: bool) -> ConfigRecord {
        let mut rec = ConfigRecord::new(
            RecordKey::from_parts("binding", &[name]),
            ControllerId::from("c1"),
            DomainId::root(),
        )
        .with_field("port", FieldValue::valid("eth0"));
        if let Some(p) = profile {
            rec = rec.with_field("profile", FieldValue::valid(p));
        }
        if bound {
            rec = rec.with_flags(RecordFlags::BOUND_PORT);
        }
        rec
    }

    fn entry(op: DiffOp, old: Option<ConfigRecord>, new: Option<ConfigRecord>) -> DiffEntry {
        DiffEntry {
            op,
            controller: ControllerId::from("c1"),
            domain: DomainId::root(),
            rank: 10,
            old,
            new,
        }
    }

    #[test]
    fn test_create_of_bound_reference_counts_once() {
        let deltas =
            handler().reference_deltas(&entry(DiffOp::Create, None, Some(record("b", Some("gold"), true))));
        assert_eq!(deltas, vec![("gold".to_string(), 1)]);
    }

    #[test]
    fn test_unbound_placeholder_never_counts() {
        let deltas =
            handler().reference_deltas(&entry(DiffOp::Create, None, Some(record("b", Some("gold"), false))));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_update_moving_reference_transfers() {
        let deltas = handler().reference_deltas(&entry(
            DiffOp::Update,
            Some(record("b", Some("gold"), true)),
            Some(record("b", Some("silver"), true)),
        ));
        assert_eq!(
            deltas,
            vec![("gold".to_string(), -1), ("silver".to_string(), 1)]
        );
    }

    #[test]
    fn test_update_unbinding_releases_reference() {
        let deltas = handler().reference_deltas(&entry(
            DiffOp::Update,
            Some(record("b", Some("gold"), true)),
            Some(record("b", Some("gold"), false)),
        ));
        assert_eq!(deltas, vec![("gold".to_string(), -1)]);
    }

    #[test]
    fn test_update_same_binding_is_neutral() {
        let deltas = handler().reference_deltas(&entry(
            DiffOp::Update,
            Some(record("b", Some("gold"), true)),
            Some(record("b", Some("gold"), true)),
        ));
        assert!(deltas.is_empty());
    }

    struct OneField;

    impl CapabilityTable for OneField {
        fn allowed_fields(
            &self,
            _controller: &ControllerId,
            _family: &FamilyTag,
            _op: DiffOp,
        ) -> Option<BTreeSet<String>> {
            Some(["port".to_string()].into_iter().collect())
        }
    }

    #[test]
    fn test_capability_rejects_first_unsupported_field() {
        let rec = record("b", Some("gold"), true);
        let err = handler()
            .validate_capability(&OneField, &ControllerId::from("c1"), DiffOp::Create, &rec)
            .unwrap_err();
        match err {
            CoordError::NotSupportedByController { field, .. } => assert_eq!(field, "profile"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_capability_ignores_non_programmable_fields() {
        let mut rec = record("b", None, false);
        rec.fields.insert(
            "profile".to_string(),
            FieldValue {
                value: "gold".to_string(),
                validity: confsync_core::record::FieldValidity::Invalid,
            },
        );
        handler()
            .validate_capability(&OneField, &ControllerId::from("c1"), DiffOp::Create, &rec)
            .unwrap();
    }
}
