//! Dependency-ordered script generation.
//!
//! The generator turns a target-annotated schema into [`ScriptUnit`]s: one
//! per object, ordered by dependency rank, followed by the deferred foreign
//! keys that break table cycles. Units are handed to a [`ScriptOutput`] and,
//! when enabled, executed on the target by the orchestrator.

pub mod graph;
pub mod output;
pub mod render;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::core::schema::{DatabaseSchema, ObjectKind, ObjectName, ObjectRef, Table};
use crate::core::traits::Dialect;
use crate::error::ConvertError;
use crate::feedback::FeedbackEvent;

pub use graph::{order_objects, DeferredKey, DependencyOrder};
pub use output::ScriptOutput;
pub use render::{render_object, SchemaObject, ScriptOptions};

/// A named, ordered sequence of statements creating one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptUnit {
    pub name: String,
    pub kind: ObjectKind,
    /// Dependency rank; a unit only depends on units of lower rank.
    pub rank: usize,
    pub statements: Vec<String>,
}

impl ScriptUnit {
    pub fn new(name: impl Into<String>, kind: ObjectKind, rank: usize, statements: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            rank,
            statements,
        }
    }

    /// Statements joined with the dialect's batch separator.
    pub fn to_script(&self, separator: &str) -> String {
        let mut script = String::new();
        for statement in &self.statements {
            script.push_str(statement.trim_end());
            script.push_str(separator);
            script.push_str("\n\n");
        }
        script
    }
}

/// Everything the generator produced for one schema.
#[derive(Debug, Clone, Default)]
pub struct ScriptPlan {
    /// Object units in dependency order.
    pub units: Vec<ScriptUnit>,
    /// Cycle-breaking foreign keys, issued after all tables exist.
    pub deferred: Vec<ScriptUnit>,
    pub order: DependencyOrder,
    pub events: Vec<FeedbackEvent>,
    /// Objects not scripted (cycles, dependents, existing objects).
    pub skipped: usize,
    /// Tables that already exist on the target and were not created.
    pub existing: HashSet<ObjectName>,
}

impl ScriptPlan {
    pub fn object_count(&self) -> usize {
        self.units.len() + self.deferred.len()
    }

    /// The whole plan as one script.
    pub fn to_script(&self, separator: &str) -> String {
        self.units
            .iter()
            .chain(self.deferred.iter())
            .map(|u| u.to_script(separator))
            .collect()
    }
}

/// Renders a schema into ordered script units.
pub struct ScriptGenerator {
    dialect: Arc<dyn Dialect>,
    options: ScriptOptions,
    existing: HashSet<ObjectRef>,
}

impl ScriptGenerator {
    pub fn new(dialect: Arc<dyn Dialect>, options: ScriptOptions) -> Self {
        Self {
            dialect,
            options,
            existing: HashSet::new(),
        }
    }

    /// Objects already present on the target; they are not created again.
    pub fn with_existing(mut self, existing: impl IntoIterator<Item = ObjectRef>) -> Self {
        self.existing = existing
            .into_iter()
            .map(|r| ObjectRef::new(r.kind, lowercase(&r.name)))
            .collect();
        self
    }

    fn exists(&self, object: &ObjectRef) -> bool {
        self.existing
            .contains(&ObjectRef::new(object.kind, lowercase(&object.name)))
    }

    pub fn generate(&self, schema: &DatabaseSchema) -> ScriptPlan {
        let order = order_objects(schema, self.dialect.supports_add_foreign_key());
        let mut plan = ScriptPlan::default();

        for cycle in &order.cycles {
            let err = ConvertError::DependencyCycle {
                objects: cycle.iter().map(|r| r.name.to_string()).collect(),
            };
            plan.events.push(FeedbackEvent::from_error(&err));
            plan.skipped += cycle.len();
        }
        for dependent in &order.blocked_dependents {
            plan.events.push(
                FeedbackEvent::warning(format!(
                    "Skipped {}: it depends on objects in a dependency cycle",
                    dependent
                ))
                .with_object(dependent.name.to_string()),
            );
            plan.skipped += 1;
        }

        for (object, rank) in &order.ordered {
            if self.exists(object) {
                plan.events.push(
                    FeedbackEvent::info(format!("{} already exists on the target; not created", object))
                        .with_object(object.name.to_string()),
                );
                if object.kind == ObjectKind::Table {
                    plan.existing.insert(object.name.clone());
                }
                plan.skipped += 1;
                continue;
            }
            let statements = self.render(schema, object, &order);
            if statements.is_empty() {
                continue;
            }
            plan.units.push(ScriptUnit::new(
                object.name.to_string(),
                object.kind,
                *rank,
                statements,
            ));
        }

        let trailing_rank = order.ordered.last().map(|(_, r)| r + 1).unwrap_or(0);
        for key in &order.deferred {
            if plan.existing.contains(&key.table) {
                continue;
            }
            let Some(table) = find_table(schema, &key.table) else {
                continue;
            };
            let Some(fk) = table.foreign_keys.iter().find(|fk| fk.name == key.constraint) else {
                continue;
            };
            plan.deferred.push(ScriptUnit::new(
                format!("{}.{}", key.table, key.constraint),
                ObjectKind::ForeignKey,
                trailing_rank,
                render_object(self.dialect.as_ref(), SchemaObject::ForeignKey(table, fk), &self.options),
            ));
        }

        debug!(
            "Generated {} script units ({} deferred foreign keys, {} skipped)",
            plan.units.len(),
            plan.deferred.len(),
            plan.skipped
        );
        plan.order = order;
        plan
    }

    fn render(&self, schema: &DatabaseSchema, object: &ObjectRef, order: &DependencyOrder) -> Vec<String> {
        let d = self.dialect.as_ref();
        let opts = &self.options;
        let name = &object.name;
        let same = |owner: &str, n: &str| ObjectName::new(owner, n) == *name;
        match object.kind {
            ObjectKind::Table => find_table(schema, name)
                .map(|table| {
                    let mut inline = table.clone();
                    inline
                        .foreign_keys
                        .retain(|fk| !order.is_deferred(&table.object_name(), &fk.name));
                    render_object(d, SchemaObject::Table(&inline), opts)
                })
                .unwrap_or_default(),
            ObjectKind::View => schema
                .views
                .iter()
                .find(|v| same(&v.owner, &v.name))
                .map(|v| render_object(d, SchemaObject::View(v), opts))
                .unwrap_or_default(),
            ObjectKind::Function => schema
                .functions
                .iter()
                .find(|r| same(&r.owner, &r.name))
                .map(|r| render_object(d, SchemaObject::Function(r), opts))
                .unwrap_or_default(),
            ObjectKind::Procedure => schema
                .procedures
                .iter()
                .find(|r| same(&r.owner, &r.name))
                .map(|r| render_object(d, SchemaObject::Procedure(r), opts))
                .unwrap_or_default(),
            ObjectKind::Trigger => schema
                .triggers
                .iter()
                .find(|t| same(&t.owner, &t.name))
                .map(|t| render_object(d, SchemaObject::Trigger(t), opts))
                .unwrap_or_default(),
            ObjectKind::Sequence => schema
                .sequences
                .iter()
                .find(|s| same(&s.owner, &s.name))
                .map(|s| render_object(d, SchemaObject::Sequence(s), opts))
                .unwrap_or_default(),
            ObjectKind::UserType => schema
                .user_types
                .iter()
                .find(|u| same(&u.owner, &u.name))
                .map(|u| render_object(d, SchemaObject::UserType(u), opts))
                .unwrap_or_default(),
            ObjectKind::ForeignKey | ObjectKind::Data => Vec::new(),
        }
    }
}

fn find_table<'a>(schema: &'a DatabaseSchema, name: &ObjectName) -> Option<&'a Table> {
    schema
        .tables
        .iter()
        .find(|t| t.owner == name.owner && t.name == name.name)
}

fn lowercase(name: &ObjectName) -> ObjectName {
    ObjectName::new(name.owner.to_lowercase(), name.name.to_lowercase())
}
