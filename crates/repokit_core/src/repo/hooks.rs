//! Lifecycle hooks run by the unit of work before inserts and updates.
//!
//! # Responsibility
//! - Provide an ordered hook pipeline applied to entity records.
//! - Maintain audit timestamps and principals through injectable seams
//!   (`Clock`, `AuditorAware`).
//!
//! # Invariants
//! - Hooks only touch columns the entity metadata declares.
//! - `PrePersist` sets created and updated values together; `PreUpdate` only
//!   touches the updated values.

use crate::model::entity::EntityMeta;
use crate::model::value::Record;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in epoch milliseconds.
pub trait Clock {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            })
    }
}

/// Settable clock; clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Supplies the principal recorded in created-by/updated-by columns.
pub trait AuditorAware {
    fn current_auditor(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct FixedAuditor(pub String);

impl AuditorAware for FixedAuditor {
    fn current_auditor(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PrePersist,
    PreUpdate,
}

/// Callback applied to the record about to be written.
pub trait LifecycleHook {
    fn apply(&self, stage: HookStage, meta: &'static EntityMeta, record: &mut Record);
}

/// Writes created-at/updated-at from a `Clock`.
pub struct AuditTimestamps {
    clock: Box<dyn Clock>,
}

impl AuditTimestamps {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }
}

impl LifecycleHook for AuditTimestamps {
    fn apply(&self, stage: HookStage, meta: &'static EntityMeta, record: &mut Record) {
        let now = self.clock.now_millis();
        if stage == HookStage::PrePersist {
            if let Some(column) = meta.audit.created_at {
                record.set(column, now);
            }
        }
        if let Some(column) = meta.audit.updated_at {
            record.set(column, now);
        }
    }
}

/// Writes created-by/updated-by from an `AuditorAware`.
pub struct AuditPrincipals {
    auditor: Box<dyn AuditorAware>,
}

impl AuditPrincipals {
    pub fn new(auditor: impl AuditorAware + 'static) -> Self {
        Self {
            auditor: Box::new(auditor),
        }
    }
}

impl LifecycleHook for AuditPrincipals {
    fn apply(&self, stage: HookStage, meta: &'static EntityMeta, record: &mut Record) {
        let principal = self.auditor.current_auditor();
        if stage == HookStage::PrePersist {
            if let Some(column) = meta.audit.created_by {
                record.set(column, principal.clone());
            }
        }
        if let Some(column) = meta.audit.updated_by {
            record.set(column, principal);
        }
    }
}

/// Ordered list of hooks; runs in registration order.
#[derive(Default)]
pub struct HookPipeline {
    hooks: Vec<Box<dyn LifecycleHook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with timestamp and principal auditing.
    pub fn with_auditing(clock: impl Clock + 'static, auditor: impl AuditorAware + 'static) -> Self {
        let mut pipeline = Self::new();
        pipeline.push(AuditTimestamps::new(clock));
        pipeline.push(AuditPrincipals::new(auditor));
        pipeline
    }

    pub fn push(&mut self, hook: impl LifecycleHook + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run(&self, stage: HookStage, meta: &'static EntityMeta, record: &mut Record) {
        for hook in &self.hooks {
            hook.apply(stage, meta, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedAuditor, HookPipeline, HookStage, ManualClock};
    use crate::model::item::ITEM_META;
    use crate::model::member::MEMBER_META;
    use crate::model::value::{Record, Value};

    #[test]
    fn pre_persist_sets_created_and_updated_together() {
        let clock = ManualClock::new(1_000);
        let pipeline = HookPipeline::with_auditing(clock, FixedAuditor("admin".to_string()));
        let mut record = Record::new().with("username", "member1");
        pipeline.run(HookStage::PrePersist, &MEMBER_META, &mut record);

        assert_eq!(record.get("created_at"), &Value::Integer(1_000));
        assert_eq!(record.get("updated_at"), &Value::Integer(1_000));
        assert_eq!(record.get("created_by"), &Value::from("admin"));
        assert_eq!(record.get("updated_by"), &Value::from("admin"));
    }

    #[test]
    fn pre_update_leaves_created_values() {
        let clock = ManualClock::new(1_000);
        let pipeline =
            HookPipeline::with_auditing(clock.clone(), FixedAuditor("admin".to_string()));
        let mut record = Record::new()
            .with("created_at", 10)
            .with("created_by", "creator");
        clock.advance(500);
        pipeline.run(HookStage::PreUpdate, &MEMBER_META, &mut record);

        assert_eq!(record.get("created_at"), &Value::Integer(10));
        assert_eq!(record.get("created_by"), &Value::from("creator"));
        assert_eq!(record.get("updated_at"), &Value::Integer(1_500));
    }

    #[test]
    fn undeclared_audit_columns_are_not_written() {
        let pipeline =
            HookPipeline::with_auditing(ManualClock::new(5), FixedAuditor("x".to_string()));
        let mut record = Record::new().with("item_id", "A");
        pipeline.run(HookStage::PrePersist, &ITEM_META, &mut record);

        assert_eq!(record.get("created_at"), &Value::Integer(5));
        assert!(!record.contains("updated_at"));
        assert!(!record.contains("created_by"));
    }
}
