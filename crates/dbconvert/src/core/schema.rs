//! Schema model: tables, columns, indexes, keys, views, routines, triggers,
//! sequences and user-defined types, plus the dependency edges between them.
//!
//! These types provide a database-agnostic representation of schema metadata
//! used throughout the conversion process. A [`DatabaseSchema`] is produced by
//! an interpreter's introspection and then handed by value to the mapper,
//! which returns a target-annotated copy.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{ConvertError, Result};

/// Kind of schema object.
///
/// The declaration order is the tie-break order used when two objects have
/// no dependency between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    UserType,
    Sequence,
    Table,
    View,
    Function,
    Procedure,
    Trigger,
    /// Trailing foreign-key constraint added after all tables exist.
    ForeignKey,
    /// Row data rendered as INSERT statements.
    Data,
}

impl ObjectKind {
    /// Kinds that can be selected for introspection.
    pub const SELECTABLE: [ObjectKind; 7] = [
        ObjectKind::UserType,
        ObjectKind::Sequence,
        ObjectKind::Table,
        ObjectKind::View,
        ObjectKind::Function,
        ObjectKind::Procedure,
        ObjectKind::Trigger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::UserType => "user type",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Trigger => "trigger",
            ObjectKind::ForeignKey => "foreign key",
            ObjectKind::Data => "data",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner-qualified object name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName {
    /// Owner (schema). Empty for engines without owner namespaces.
    pub owner: String,
    pub name: String,
}

impl ObjectName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive comparison, used to resolve catalog references.
    pub fn matches(&self, owner: &str, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            && (owner.is_empty() || self.owner.is_empty() || self.owner.eq_ignore_ascii_case(owner))
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.owner.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.owner, self.name)
        }
    }
}

/// A reference to one object of a given kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: ObjectName,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: ObjectName) -> Self {
        Self { kind, name }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Full structural snapshot of one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Database name.
    pub name: String,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub functions: Vec<Routine>,
    pub procedures: Vec<Routine>,
    pub triggers: Vec<Trigger>,
    pub sequences: Vec<Sequence>,
    pub user_types: Vec<UserDefinedType>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Total number of objects across all kinds.
    pub fn object_count(&self) -> usize {
        self.tables.len()
            + self.views.len()
            + self.functions.len()
            + self.procedures.len()
            + self.triggers.len()
            + self.sequences.len()
            + self.user_types.len()
    }

    pub fn find_table(&self, name: &ObjectName) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.object_name().matches(&name.owner, &name.name))
    }

    /// Every object in the snapshot as an [`ObjectRef`].
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        let mut refs = Vec::with_capacity(self.object_count());
        refs.extend(
            self.user_types
                .iter()
                .map(|t| ObjectRef::new(ObjectKind::UserType, t.object_name())),
        );
        refs.extend(
            self.sequences
                .iter()
                .map(|s| ObjectRef::new(ObjectKind::Sequence, s.object_name())),
        );
        refs.extend(
            self.tables
                .iter()
                .map(|t| ObjectRef::new(ObjectKind::Table, t.object_name())),
        );
        refs.extend(
            self.views
                .iter()
                .map(|v| ObjectRef::new(ObjectKind::View, v.object_name())),
        );
        refs.extend(
            self.functions
                .iter()
                .map(|r| ObjectRef::new(ObjectKind::Function, r.object_name())),
        );
        refs.extend(
            self.procedures
                .iter()
                .map(|r| ObjectRef::new(ObjectKind::Procedure, r.object_name())),
        );
        refs.extend(
            self.triggers
                .iter()
                .map(|t| ObjectRef::new(ObjectKind::Trigger, t.object_name())),
        );
        refs
    }

    /// Check that object names are unique within their kind and owner.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for r in self.object_refs() {
            let key = (
                r.kind,
                r.name.owner.to_lowercase(),
                r.name.name.to_lowercase(),
            );
            if !seen.insert(key) {
                return Err(ConvertError::Config(format!(
                    "Duplicate {} name: {}",
                    r.kind, r.name
                )));
            }
        }
        Ok(())
    }

    /// Drop foreign keys whose referenced table is not part of this snapshot.
    ///
    /// Returns a description of every dropped key so the caller can report it.
    pub fn prune_dangling_foreign_keys(&mut self) -> Vec<String> {
        let present: Vec<ObjectName> = self.tables.iter().map(|t| t.object_name()).collect();
        let mut dropped = Vec::new();
        for table in &mut self.tables {
            let owner = table.full_name();
            table.foreign_keys.retain(|fk| {
                let target = fk.referenced_table();
                let keep = present
                    .iter()
                    .any(|p| p.matches(&target.owner, &target.name));
                if !keep {
                    dropped.push(format!(
                        "Foreign key {} on {} references {} which is not part of the selection",
                        fk.name, owner, target
                    ));
                }
                keep
            });
        }
        dropped
    }

    /// Dependency edges between objects: `from` depends on `to`.
    ///
    /// Self references (a table referencing itself) are not reported.
    pub fn dependency_edges(&self) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        let known = self.object_refs();

        let resolve = |name: &ObjectName, kinds: &[ObjectKind]| -> Option<ObjectRef> {
            known
                .iter()
                .find(|r| kinds.contains(&r.kind) && r.name.matches(&name.owner, &name.name))
                .cloned()
        };

        for table in &self.tables {
            let from = ObjectRef::new(ObjectKind::Table, table.object_name());
            for fk in &table.foreign_keys {
                if let Some(to) = resolve(&fk.referenced_table(), &[ObjectKind::Table]) {
                    if to != from {
                        edges.push(DependencyEdge {
                            from: from.clone(),
                            to,
                            reason: EdgeReason::ForeignKey(fk.name.clone()),
                        });
                    }
                }
            }
            for col in &table.columns {
                for udt in &self.user_types {
                    if col.data_type.eq_ignore_ascii_case(&udt.name) {
                        edges.push(DependencyEdge {
                            from: from.clone(),
                            to: ObjectRef::new(ObjectKind::UserType, udt.object_name()),
                            reason: EdgeReason::Reference,
                        });
                    }
                }
                if let Some(default) = &col.default_expression {
                    let lowered = default.to_lowercase();
                    for seq in &self.sequences {
                        if lowered.contains(&seq.name.to_lowercase()) {
                            edges.push(DependencyEdge {
                                from: from.clone(),
                                to: ObjectRef::new(ObjectKind::Sequence, seq.object_name()),
                                reason: EdgeReason::Reference,
                            });
                        }
                    }
                }
            }
        }

        let referencing = self
            .views
            .iter()
            .map(|v| (ObjectKind::View, v.object_name(), &v.references))
            .chain(
                self.functions
                    .iter()
                    .map(|r| (ObjectKind::Function, r.object_name(), &r.references)),
            )
            .chain(
                self.procedures
                    .iter()
                    .map(|r| (ObjectKind::Procedure, r.object_name(), &r.references)),
            );
        for (kind, name, references) in referencing {
            let from = ObjectRef::new(kind, name);
            for reference in references {
                if let Some(to) = resolve(
                    reference,
                    &[
                        ObjectKind::Table,
                        ObjectKind::View,
                        ObjectKind::Function,
                        ObjectKind::Procedure,
                        ObjectKind::Sequence,
                    ],
                ) {
                    if to != from {
                        edges.push(DependencyEdge {
                            from: from.clone(),
                            to,
                            reason: EdgeReason::Reference,
                        });
                    }
                }
            }
        }

        for trigger in &self.triggers {
            if let Some(to) = resolve(&trigger.table, &[ObjectKind::Table, ObjectKind::View]) {
                edges.push(DependencyEdge {
                    from: ObjectRef::new(ObjectKind::Trigger, trigger.object_name()),
                    to,
                    reason: EdgeReason::TriggerTarget,
                });
            }
        }

        edges
    }

    /// Fill in `references` for views and routines that have none, by
    /// looking for known object names in their definitions.
    ///
    /// Used for engines whose catalog does not expose view/routine
    /// dependencies.
    pub fn infer_references(&mut self) {
        let candidates: Vec<ObjectName> = self
            .tables
            .iter()
            .map(|t| t.object_name())
            .chain(self.views.iter().map(|v| v.object_name()))
            .chain(self.functions.iter().map(|f| f.object_name()))
            .collect();

        let infer = |own: &ObjectName, definition: &str| -> Vec<ObjectName> {
            let words = identifier_words(definition);
            candidates
                .iter()
                .filter(|c| *c != own && words.contains(&c.name.to_lowercase()))
                .cloned()
                .collect()
        };

        for view in &mut self.views {
            if view.references.is_empty() {
                view.references = infer(&view.object_name(), &view.definition);
            }
        }
        for routine in self.functions.iter_mut().chain(self.procedures.iter_mut()) {
            if routine.references.is_empty() {
                routine.references = infer(&routine.object_name(), &routine.definition);
            }
        }
    }
}

/// Split SQL text into lowercase identifier words, ignoring quote characters.
fn identifier_words(sql: &str) -> HashSet<String> {
    sql.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Why one object depends on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeReason {
    /// Foreign key constraint, by name.
    ForeignKey(String),
    /// Object text or column type references the target.
    Reference,
    /// Trigger defined on a table or view.
    TriggerTarget,
}

/// Directed dependency: `from` requires `to` to exist first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: ObjectRef,
    pub to: ObjectRef,
    pub reason: EdgeReason,
}

/// Table metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    /// Owner (schema) name.
    pub owner: String,

    /// Table name.
    pub name: String,

    /// Column definitions ordered by ordinal position.
    pub columns: Vec<Column>,

    /// Primary key, if any.
    pub primary_key: Option<PrimaryKey>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// Non-primary key indexes.
    pub indexes: Vec<Index>,

    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,

    /// Table description.
    pub comment: Option<String>,

    /// Approximate row count from catalog statistics.
    pub row_count: i64,
}

impl Table {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        self.object_name().to_string()
    }

    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.primary_key
            .as_ref()
            .map(|pk| !pk.columns.is_empty())
            .unwrap_or(false)
    }

    /// Primary key column names, empty when the table has none.
    pub fn pk_columns(&self) -> &[String] {
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_identity)
    }

    /// Check that ordinal positions are 1..=n, unique and contiguous.
    pub fn validate_ordinals(&self) -> std::result::Result<(), String> {
        let mut ordinals: Vec<i32> = self.columns.iter().map(|c| c.ordinal_pos).collect();
        ordinals.sort_unstable();
        for (expected, actual) in (1..).zip(ordinals.iter()) {
            if *actual != expected {
                return Err(format!(
                    "column ordinals are not contiguous (expected {}, found {})",
                    expected, actual
                ));
            }
        }
        let mut names = HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.to_lowercase()) {
                return Err(format!("duplicate column {}", col.name));
            }
        }
        Ok(())
    }
}

/// Column metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "varchar", "datetime2").
    pub data_type: String,

    /// Maximum length for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is an identity/auto-increment column.
    pub is_identity: bool,

    /// Default value expression in the owning dialect's syntax.
    pub default_expression: Option<String>,

    /// Computed-column expression in the owning dialect's syntax.
    pub computed_expression: Option<String>,

    /// Column description.
    pub comment: Option<String>,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl Column {
    pub fn is_computed(&self) -> bool {
        self.computed_expression.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Constraint name; may be empty when the engine does not name keys.
    pub name: String,
    pub columns: Vec<String>,
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,

    /// Whether the index is clustered.
    pub is_clustered: bool,

    /// Included columns (non-key).
    pub include_cols: Vec<String>,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced owner name.
    pub ref_owner: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}

impl ForeignKey {
    pub fn referenced_table(&self) -> ObjectName {
        ObjectName::new(&self.ref_owner, &self.ref_table)
    }
}

/// Check constraint metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,

    /// Constraint definition (SQL expression).
    pub definition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct View {
    pub owner: String,
    pub name: String,
    /// Full `CREATE VIEW` statement or the select body, as the catalog returns it.
    pub definition: String,
    /// Objects the view reads from.
    pub references: Vec<ObjectName>,
    pub comment: Option<String>,
}

impl View {
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }
}

/// Function or stored procedure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Routine {
    pub owner: String,
    pub name: String,
    pub definition: String,
    pub references: Vec<ObjectName>,
}

impl Routine {
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trigger {
    pub owner: String,
    pub name: String,
    /// Table or view the trigger fires on.
    pub table: ObjectName,
    pub definition: String,
}

impl Trigger {
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub owner: String,
    pub name: String,
    pub data_type: String,
    pub start_value: i64,
    pub increment: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cycle: bool,
}

impl Sequence {
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }
}

/// Alias or domain type built on a base type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefinedType {
    pub owner: String,
    pub name: String,
    pub base_type: String,
    pub max_length: i32,
    pub precision: i32,
    pub scale: i32,
    pub is_nullable: bool,
}

impl UserDefinedType {
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.owner, &self.name)
    }
}

/// Resolve columns declared with a user-defined type to the type's base
/// definition. Returns the number of columns rewritten.
pub fn resolve_user_types(schema: &mut DatabaseSchema) -> usize {
    let by_name: HashMap<String, UserDefinedType> = schema
        .user_types
        .iter()
        .map(|t| (t.name.to_lowercase(), t.clone()))
        .collect();
    let mut rewritten = 0;
    for table in &mut schema.tables {
        for col in &mut table.columns {
            if let Some(udt) = by_name.get(&col.data_type.to_lowercase()) {
                col.data_type = udt.base_type.clone();
                col.max_length = udt.max_length;
                col.precision = udt.precision;
                col.scale = udt.scale;
                rewritten += 1;
            }
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_test_column, make_test_table};

    #[test]
    fn test_table_full_name() {
        let table = make_test_table("dbo", "TestTable", vec![]);
        assert_eq!(table.full_name(), "dbo.TestTable");
        assert_eq!(ObjectName::new("", "t").to_string(), "t");
    }

    #[test]
    fn test_validate_ordinals() {
        let mut table = make_test_table(
            "dbo",
            "T",
            vec![make_test_column("a", "int"), make_test_column("b", "int")],
        );
        assert!(table.validate_ordinals().is_ok());

        table.columns[1].ordinal_pos = 3;
        let err = table.validate_ordinals().unwrap_err();
        assert!(err.contains("not contiguous"));

        table.columns[1].ordinal_pos = 1;
        assert!(table.validate_ordinals().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut schema = DatabaseSchema::new("db");
        schema.tables.push(make_test_table("dbo", "Orders", vec![]));
        schema.tables.push(make_test_table("DBO", "orders", vec![]));
        assert!(schema.validate().is_err());

        schema.tables[1].owner = "sales".into();
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_prune_dangling_foreign_keys() {
        let mut schema = DatabaseSchema::new("db");
        let mut orders = make_test_table("dbo", "Orders", vec![make_test_column("cust_id", "int")]);
        orders.foreign_keys.push(crate::testing::make_fk("FK_cust", "cust_id", "dbo", "Customers"));
        schema.tables.push(orders);

        let dropped = schema.prune_dangling_foreign_keys();
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].contains("FK_cust"));
        assert!(schema.tables[0].foreign_keys.is_empty());
    }

    #[test]
    fn test_dependency_edges() {
        let mut schema = DatabaseSchema::new("db");
        let customers = make_test_table("dbo", "Customers", vec![make_test_column("id", "int")]);
        let mut orders = make_test_table("dbo", "Orders", vec![make_test_column("cust_id", "int")]);
        orders.foreign_keys.push(crate::testing::make_fk("FK_cust", "cust_id", "dbo", "Customers"));
        orders.foreign_keys.push(crate::testing::make_fk("FK_self", "cust_id", "dbo", "Orders"));
        schema.tables.push(customers);
        schema.tables.push(orders);
        schema.views.push(View {
            owner: "dbo".into(),
            name: "v_orders".into(),
            definition: "SELECT * FROM [dbo].[Orders]".into(),
            references: vec![],
            comment: None,
        });
        schema.infer_references();

        let edges = schema.dependency_edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].to.name.name, "Customers");
        assert_eq!(edges[0].reason, EdgeReason::ForeignKey("FK_cust".into()));
        assert_eq!(edges[1].from.kind, ObjectKind::View);
        assert_eq!(edges[1].to.name.name, "Orders");
    }

    #[test]
    fn test_resolve_user_types() {
        let mut schema = DatabaseSchema::new("db");
        schema.user_types.push(UserDefinedType {
            owner: "dbo".into(),
            name: "Phone".into(),
            base_type: "varchar".into(),
            max_length: 20,
            precision: 0,
            scale: 0,
            is_nullable: true,
        });
        schema.tables.push(make_test_table(
            "dbo",
            "Contacts",
            vec![make_test_column("phone", "phone")],
        ));

        assert_eq!(resolve_user_types(&mut schema), 1);
        let col = &schema.tables[0].columns[0];
        assert_eq!(col.data_type, "varchar");
        assert_eq!(col.max_length, 20);
    }
}
