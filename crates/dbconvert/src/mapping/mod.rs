//! Type and identifier mapping from a source schema to a target schema.
//!
//! The [`SchemaMapper`] takes the source snapshot by value and returns it
//! together with a target-annotated copy: owners remapped, names adjusted to
//! the target's casing and length rules, column types resolved through the
//! canonical hub, and expressions translated. Tables keep their order and
//! column order, so `target.tables[i]` always corresponds to
//! `source.tables[i]`.
//!
//! Mapping never fails for a single object. Anything that cannot be carried
//! over is reported as a [`FeedbackEvent`] and left out.

pub mod identifier;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::ConversionOption;
use crate::core::identifier::{validate_expression, validate_identifier};
use crate::core::schema::{
    resolve_user_types, CheckConstraint, Column, DatabaseSchema, ForeignKey, Index, ObjectName,
    PrimaryKey, Routine, Sequence, Table, Trigger, UserDefinedType, View,
};
use crate::core::traits::Dialect;
use crate::dialect::canonical::{CanonicalType, NativeType, NativeTypes};
use crate::dialect::expr::{extract_view_body, translate_expression, translate_identifiers};
use crate::error::{ConvertError, Result};
use crate::feedback::FeedbackEvent;

pub use identifier::IdentifierMapper;

/// Outcome of resolving one canonical type on a target.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeResolution {
    pub native: NativeType,
    /// The canonical type that was finally matched.
    pub canonical: CanonicalType,
    /// The requested type, when a wider one had to be used.
    pub widened_from: Option<CanonicalType>,
}

/// Resolve a canonical type on a target vocabulary.
///
/// Exact matches are used as is. Otherwise the type is widened step by step
/// until the target has an equivalent, so a value never loses range or
/// precision. `Text` and `Blob` end every chain.
pub fn map_type(canonical: &CanonicalType, target: &dyn NativeTypes) -> TypeResolution {
    let mut current = canonical.clone();
    loop {
        if let Some(native) = target.from_canonical(&current) {
            let widened_from = (current != *canonical).then(|| canonical.clone());
            return TypeResolution {
                native,
                canonical: current,
                widened_from,
            };
        }
        current = match current.widen() {
            Some(wider) => wider,
            None => {
                // Only reachable for engines without TEXT/BLOB equivalents.
                let fallback = if canonical.is_binary() {
                    CanonicalType::Blob
                } else {
                    CanonicalType::Text
                };
                return TypeResolution {
                    native: NativeType::plain(fallback.to_string().to_lowercase()),
                    canonical: fallback,
                    widened_from: Some(canonical.clone()),
                };
            }
        };
    }
}

/// Switches that affect mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingOptions {
    pub owner_mapping: Vec<(String, String)>,
    pub quote_identifiers: bool,
    pub generate_identity: bool,
    pub convert_computed_columns: bool,
    pub only_comment_computed_expression: bool,
}

impl From<&ConversionOption> for MappingOptions {
    fn from(opts: &ConversionOption) -> Self {
        Self {
            owner_mapping: opts.owner_mapping(),
            quote_identifiers: opts.quote_identifiers,
            generate_identity: opts.generate_identity,
            convert_computed_columns: opts.convert_computed_columns,
            only_comment_computed_expression: opts.only_comment_computed_expression,
        }
    }
}

/// Source snapshot and its target-annotated copy.
#[derive(Debug, Clone)]
pub struct MappedSchema {
    pub source: DatabaseSchema,
    pub target: DatabaseSchema,
    /// Warnings and notes produced while mapping.
    pub events: Vec<FeedbackEvent>,
    /// Objects left out of the target.
    pub skipped: usize,
}

impl MappedSchema {
    /// Source and target tables, pairwise.
    pub fn table_pairs(&self) -> impl Iterator<Item = (&Table, &Table)> {
        self.source.tables.iter().zip(self.target.tables.iter())
    }
}

/// Maps a source schema onto a target dialect.
pub struct SchemaMapper {
    source: Arc<dyn Dialect>,
    target: Arc<dyn Dialect>,
    options: MappingOptions,
    names: IdentifierMapper,
    events: Vec<FeedbackEvent>,
    skipped: usize,
}

impl SchemaMapper {
    pub fn new(source: Arc<dyn Dialect>, target: Arc<dyn Dialect>, options: MappingOptions) -> Self {
        let names = IdentifierMapper::new(target.clone(), &options.owner_mapping, options.quote_identifiers);
        Self {
            source,
            target,
            options,
            names,
            events: Vec::new(),
            skipped: 0,
        }
    }

    fn same_engine(&self) -> bool {
        self.source.name() == self.target.name()
    }

    fn warn(&mut self, object: impl Into<String>, message: impl Into<String>) {
        self.events.push(FeedbackEvent::warning(message).with_object(object));
    }

    fn note(&mut self, object: impl Into<String>, message: impl Into<String>) {
        self.events.push(FeedbackEvent::info(message).with_object(object));
    }

    /// Map a whole schema. Fails only when the snapshot itself is invalid
    /// (duplicate object names).
    pub fn map(mut self, mut source: DatabaseSchema) -> Result<MappedSchema> {
        source.validate()?;

        // Foreign keys into dropped tables dangle too.
        self.drop_invalid_tables(&mut source);
        for dropped in source.prune_dangling_foreign_keys() {
            self.warn("", dropped);
        }

        if !self.same_engine() {
            let resolved = resolve_user_types(&mut source);
            if resolved > 0 {
                debug!("Resolved {} columns declared with user-defined types", resolved);
            }
        }

        let mut target = DatabaseSchema::new(source.name.clone());
        target.tables = source.tables.iter().map(|t| self.map_table(t)).collect();

        // Column names of every table are now known; foreign keys can be
        // mapped against them.
        for (src, tgt) in source.tables.iter().zip(target.tables.iter_mut()) {
            tgt.foreign_keys = src
                .foreign_keys
                .iter()
                .map(|fk| self.map_foreign_key(src, fk))
                .collect();
        }

        target.views = source.views.iter().map(|v| self.map_view(v)).collect();
        target.functions = self.map_routines(&source.functions, "Function");
        target.procedures = self.map_routines(&source.procedures, "Procedure");
        target.triggers = self.map_triggers(&source.triggers);
        target.sequences = self.map_sequences(&source.sequences);
        target.user_types = self.map_user_types(&source.user_types);

        for warning in self.names.take_warnings() {
            self.warn("", warning);
        }
        target.validate()?;

        Ok(MappedSchema {
            source,
            target,
            events: self.events,
            skipped: self.skipped,
        })
    }

    /// Remove tables whose metadata cannot be scripted.
    fn drop_invalid_tables(&mut self, source: &mut DatabaseSchema) {
        let mut kept = Vec::with_capacity(source.tables.len());
        for table in std::mem::take(&mut source.tables) {
            let problem = table
                .validate_ordinals()
                .err()
                .or_else(|| validate_identifier(&table.name).err().map(|e| e.to_string()))
                .or_else(|| {
                    table
                        .columns
                        .iter()
                        .find_map(|c| validate_identifier(&c.name).err().map(|e| e.to_string()))
                });
            match problem {
                Some(message) => {
                    let err = ConvertError::partial(table.full_name(), message);
                    self.events.push(FeedbackEvent::from_error(&err).with_object(table.full_name()));
                    self.skipped += 1;
                }
                None => kept.push(table),
            }
        }
        source.tables = kept;
    }

    fn map_table(&mut self, src: &Table) -> Table {
        let src_name = src.object_name();
        let name = self.names.map_identifier(&src_name);

        let columns = src
            .columns
            .iter()
            .map(|c| self.map_column(src, c))
            .collect::<Vec<_>>();

        let primary_key = src.primary_key.as_ref().map(|pk| PrimaryKey {
            name: if pk.name.is_empty() {
                String::new()
            } else {
                self.names.map_constraint(&src.owner, &pk.name)
            },
            columns: pk
                .columns
                .iter()
                .map(|c| self.names.map_column(&src_name, c))
                .collect(),
        });

        let indexes = src
            .indexes
            .iter()
            .map(|idx| Index {
                name: self.names.map_constraint(&src.owner, &idx.name),
                columns: idx.columns.iter().map(|c| self.names.map_column(&src_name, c)).collect(),
                is_unique: idx.is_unique,
                is_clustered: idx.is_clustered,
                include_cols: idx
                    .include_cols
                    .iter()
                    .map(|c| self.names.map_column(&src_name, c))
                    .collect(),
            })
            .collect();

        let mut check_constraints = Vec::new();
        for chk in &src.check_constraints {
            let object = format!("{}.{}", src.full_name(), chk.name);
            match self.translate(&chk.definition) {
                Some(definition) => check_constraints.push(CheckConstraint {
                    name: self.names.map_constraint(&src.owner, &chk.name),
                    definition,
                }),
                None => self.warn(
                    object.clone(),
                    format!(
                        "Check constraint {} was not created: its expression has no equivalent on {}",
                        object,
                        self.target.name()
                    ),
                ),
            }
        }

        Table {
            owner: name.owner,
            name: name.name,
            columns,
            primary_key,
            foreign_keys: Vec::new(),
            indexes,
            check_constraints,
            comment: src.comment.clone(),
            row_count: src.row_count,
        }
    }

    /// Translate an expression for the target, after screening it.
    fn translate(&self, expr: &str) -> Option<String> {
        validate_expression(expr).ok()?;
        translate_expression(
            self.source.as_ref(),
            self.target.as_ref(),
            expr,
            self.options.quote_identifiers,
        )
    }

    fn map_column(&mut self, table: &Table, src: &Column) -> Column {
        let column_ref = format!("{}.{}", table.full_name(), src.name);
        let info = self.source.map_native_type(src);
        let canonical = info.canonical_type.clone();

        let mut col = Column {
            name: self.names.map_column(&table.object_name(), &src.name),
            is_nullable: src.is_nullable,
            is_identity: src.is_identity && self.options.generate_identity,
            comment: src.comment.clone(),
            ordinal_pos: src.ordinal_pos,
            ..Default::default()
        };

        match &canonical {
            CanonicalType::Unknown(native) if self.same_engine() => {
                // Same engine: an unknown type is still valid verbatim.
                col.data_type = native.clone();
                col.max_length = src.max_length;
                col.precision = src.precision;
                col.scale = src.scale;
            }
            _ => {
                let resolution = map_type(&canonical, self.target.types());
                if let Some(warning) = info.warning.as_ref().filter(|_| !self.same_engine()) {
                    self.warn(column_ref.clone(), format!("Column {}: {}", column_ref, warning));
                }
                if let Some(requested) = &resolution.widened_from {
                    let err = ConvertError::TypeMapping {
                        column: column_ref.clone(),
                        message: format!(
                            "{} has no exact equivalent on {}; substituted {} ({})",
                            requested,
                            self.target.name(),
                            resolution.native,
                            resolution.canonical
                        ),
                    };
                    self.events.push(FeedbackEvent::from_error(&err).with_object(column_ref.clone()));
                }
                if col.is_identity && !resolution.canonical.is_integer() {
                    self.warn(
                        column_ref.clone(),
                        format!(
                            "Column {} is an identity of type {}; {} only supports integer identities, identity dropped",
                            column_ref,
                            resolution.canonical,
                            self.target.name()
                        ),
                    );
                    col.is_identity = false;
                }
                let (max_length, precision, scale) = resolution.native.dimensions();
                col.data_type = resolution.native.to_string();
                col.max_length = max_length;
                col.precision = precision;
                col.scale = scale;
            }
        }

        if let Some(default) = src.default_expression.as_deref().filter(|_| !col.is_identity) {
            match self.translate(default) {
                Some(expr) => col.default_expression = Some(self.boolean_default(&canonical, expr)),
                None => self.warn(
                    column_ref.clone(),
                    format!(
                        "Default of column {} ({}) has no equivalent on {}; default dropped",
                        column_ref,
                        default,
                        self.target.name()
                    ),
                ),
            }
        }

        if let Some(expr) = &src.computed_expression {
            self.map_computed(&column_ref, expr, &mut col);
        }

        col
    }

    /// `0`/`1` defaults on boolean columns become the target's boolean literal.
    fn boolean_default(&self, canonical: &CanonicalType, expr: String) -> String {
        use crate::core::value::SqlValue;
        match (canonical, expr.as_str()) {
            (CanonicalType::Boolean, "0") => self.target.render_literal(&SqlValue::Bool(false)),
            (CanonicalType::Boolean, "1") => self.target.render_literal(&SqlValue::Bool(true)),
            _ => expr,
        }
    }

    fn map_computed(&mut self, column_ref: &str, expr: &str, col: &mut Column) {
        let as_comment = |col: &mut Column, expr: &str| {
            let note = format!("Computed: {}", expr);
            col.comment = Some(match col.comment.take() {
                Some(existing) => format!("{} ({})", existing, note),
                None => note,
            });
            col.computed_expression = None;
        };

        if self.options.only_comment_computed_expression {
            as_comment(col, expr);
            return;
        }
        if !self.same_engine() && !self.options.convert_computed_columns {
            as_comment(col, expr);
            self.note(
                column_ref,
                format!("Computed column {} is created as a plain column", column_ref),
            );
            return;
        }
        match self.translate(expr) {
            Some(translated) => col.computed_expression = Some(translated),
            None => {
                as_comment(col, expr);
                self.warn(
                    column_ref,
                    format!(
                        "Computed column {} could not be translated to {}; created as a plain column",
                        column_ref,
                        self.target.name()
                    ),
                );
            }
        }
    }

    fn map_foreign_key(&mut self, src: &Table, fk: &ForeignKey) -> ForeignKey {
        let referenced = fk.referenced_table();
        let target_ref = self.names.map_identifier(&referenced);
        ForeignKey {
            name: self.names.map_constraint(&src.owner, &fk.name),
            columns: fk
                .columns
                .iter()
                .map(|c| self.names.map_column(&src.object_name(), c))
                .collect(),
            ref_owner: target_ref.owner,
            ref_table: target_ref.name,
            ref_columns: fk
                .ref_columns
                .iter()
                .map(|c| self.names.map_column(&referenced, c))
                .collect(),
            on_delete: fk.on_delete.clone(),
            on_update: fk.on_update.clone(),
        }
    }

    fn map_references(&mut self, references: &[ObjectName]) -> Vec<ObjectName> {
        references
            .iter()
            .map(|r| self.names.map_identifier(r))
            .collect()
    }

    fn map_view(&mut self, view: &View) -> View {
        let name = self.names.map_identifier(&view.object_name());
        let body = extract_view_body(&view.definition);
        View {
            owner: name.owner,
            name: name.name,
            definition: translate_identifiers(
                self.source.as_ref(),
                self.target.as_ref(),
                body,
                self.options.quote_identifiers,
            ),
            references: self.map_references(&view.references),
            comment: view.comment.clone(),
        }
    }

    fn map_routines(&mut self, routines: &[Routine], kind: &str) -> Vec<Routine> {
        if !self.same_engine() {
            for routine in routines {
                let name = routine.object_name().to_string();
                self.warn(
                    name.clone(),
                    format!(
                        "{} {} requires manual translation to {}; skipped",
                        kind,
                        name,
                        self.target.name()
                    ),
                );
                self.skipped += 1;
            }
            return Vec::new();
        }
        routines
            .iter()
            .map(|r| {
                let name = self.names.map_identifier(&r.object_name());
                Routine {
                    owner: name.owner,
                    name: name.name,
                    definition: r.definition.clone(),
                    references: self.map_references(&r.references),
                }
            })
            .collect()
    }

    fn map_triggers(&mut self, triggers: &[Trigger]) -> Vec<Trigger> {
        if !self.same_engine() {
            for trigger in triggers {
                let name = trigger.object_name().to_string();
                self.warn(
                    name.clone(),
                    format!(
                        "Trigger {} requires manual translation to {}; skipped",
                        name,
                        self.target.name()
                    ),
                );
                self.skipped += 1;
            }
            return Vec::new();
        }
        triggers
            .iter()
            .map(|t| {
                let name = self.names.map_identifier(&t.object_name());
                Trigger {
                    owner: name.owner,
                    name: name.name,
                    table: self.names.map_identifier(&t.table),
                    definition: t.definition.clone(),
                }
            })
            .collect()
    }

    fn map_sequences(&mut self, sequences: &[Sequence]) -> Vec<Sequence> {
        if !self.target.supports_sequences() {
            for seq in sequences {
                let name = seq.object_name().to_string();
                self.warn(
                    name.clone(),
                    format!("Sequence {} skipped: {} has no sequences", name, self.target.name()),
                );
                self.skipped += 1;
            }
            return Vec::new();
        }
        sequences
            .iter()
            .map(|s| {
                let name = self.names.map_identifier(&s.object_name());
                let info = self.source.types().to_canonical(&s.data_type, 0, 0, 0);
                Sequence {
                    owner: name.owner,
                    name: name.name,
                    data_type: map_type(&info.canonical_type, self.target.types()).native.to_string(),
                    ..s.clone()
                }
            })
            .collect()
    }

    fn map_user_types(&mut self, types: &[UserDefinedType]) -> Vec<UserDefinedType> {
        if !self.target.supports_user_types() {
            if !types.is_empty() {
                self.note(
                    "",
                    format!(
                        "{} user-defined types resolved to their base types: {} has no alias types",
                        types.len(),
                        self.target.name()
                    ),
                );
                self.skipped += types.len();
            }
            return Vec::new();
        }
        let mut seen = HashSet::new();
        types
            .iter()
            .filter(|t| seen.insert(t.object_name()))
            .map(|t| {
                let name = self.names.map_identifier(&t.object_name());
                let info = self
                    .source
                    .types()
                    .to_canonical(&t.base_type, t.max_length, t.precision, t.scale);
                let native = map_type(&info.canonical_type, self.target.types()).native;
                let (max_length, precision, scale) = native.dimensions();
                UserDefinedType {
                    owner: name.owner,
                    name: name.name,
                    base_type: native.name,
                    max_length,
                    precision,
                    scale,
                    is_nullable: t.is_nullable,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MssqlTypes, PostgresTypes, SqliteTypes};
    use crate::drivers::mssql::MssqlDialect;
    use crate::drivers::postgres::PostgresDialect;
    use crate::drivers::sqlite::SqliteDialect;
    use crate::feedback::Severity;
    use crate::testing::{make_fk, make_test_column, make_test_table};
    use pretty_assertions::assert_eq;

    fn options() -> MappingOptions {
        MappingOptions {
            owner_mapping: vec![("dbo".into(), "public".into())],
            quote_identifiers: true,
            generate_identity: true,
            convert_computed_columns: true,
            only_comment_computed_expression: false,
        }
    }

    fn ms_to_pg(schema: DatabaseSchema) -> MappedSchema {
        SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(PostgresDialect), options())
            .map(schema)
            .unwrap()
    }

    fn sized(name: &str, data_type: &str, len: i32) -> Column {
        let mut c = make_test_column(name, data_type);
        c.max_length = len;
        c
    }

    #[test]
    fn test_map_type_exact_and_widened() {
        let exact = map_type(&CanonicalType::Int32, &PostgresTypes);
        assert_eq!(exact.native.to_string(), "integer");
        assert_eq!(exact.widened_from, None);

        let widened = map_type(&CanonicalType::Binary(16), &PostgresTypes);
        assert_eq!(widened.native.to_string(), "bytea");
        assert_eq!(widened.canonical, CanonicalType::Blob);
        assert_eq!(widened.widened_from, Some(CanonicalType::Binary(16)));

        let tiny = map_type(&CanonicalType::UInt8, &PostgresTypes);
        assert_eq!(tiny.native.to_string(), "smallint");

        let float = map_type(&CanonicalType::Float32, &SqliteTypes);
        assert_eq!(float.canonical, CanonicalType::Float64);
    }

    #[test]
    fn test_map_type_never_narrows() {
        for token in [
            CanonicalType::Int64,
            CanonicalType::Decimal { precision: 38, scale: 10 },
            CanonicalType::Varchar(8000),
        ] {
            let r = map_type(&token, &MssqlTypes);
            if let Some(from) = r.widened_from {
                assert_eq!(from, token);
            }
            assert!(!(token == CanonicalType::Int64 && r.canonical == CanonicalType::Int32));
        }
    }

    #[test]
    fn test_unmapped_type_warns_with_column_and_substitute() {
        let mut schema = DatabaseSchema::new("db");
        schema.tables.push(make_test_table(
            "dbo",
            "Files",
            vec![make_test_column("id", "int"), sized("hash", "binary", 16)],
        ));
        let mapped = ms_to_pg(schema);

        let table = &mapped.target.tables[0];
        assert_eq!(table.owner, "public");
        assert_eq!(table.columns[1].data_type, "bytea");

        let warning = mapped
            .events
            .iter()
            .find(|e| e.severity == Severity::Warning)
            .unwrap();
        assert!(warning.message.contains("dbo.Files.hash"));
        assert!(warning.message.contains("bytea"));
    }

    #[test]
    fn test_defaults_checks_and_identity() {
        let mut id = make_test_column("id", "int");
        id.is_identity = true;
        id.default_expression = Some("(0)".into());
        let mut active = make_test_column("active", "bit");
        active.default_expression = Some("((1))".into());
        let mut created = make_test_column("created", "datetime2");
        created.default_expression = Some("(getdate())".into());
        let mut odd = make_test_column("odd", "int");
        odd.default_expression = Some("(datepart(year,getdate()))".into());

        let mut table = make_test_table("dbo", "T", vec![id, active, created, odd]);
        table.check_constraints.push(CheckConstraint {
            name: "CK_T_id".into(),
            definition: "([id]>(0))".into(),
        });
        let mut schema = DatabaseSchema::new("db");
        schema.tables.push(table);
        let mapped = ms_to_pg(schema);

        let cols = &mapped.target.tables[0].columns;
        assert!(cols[0].is_identity);
        assert_eq!(cols[0].default_expression, None);
        assert_eq!(cols[1].default_expression.as_deref(), Some("true"));
        assert_eq!(cols[2].default_expression.as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(cols[3].default_expression, None);
        assert_eq!(
            mapped.target.tables[0].check_constraints[0].definition,
            "\"id\">(0)"
        );
        assert!(mapped
            .events
            .iter()
            .any(|e| e.message.contains("Default of column dbo.T.odd")));
    }

    #[test]
    fn test_identity_disabled() {
        let mut id = make_test_column("id", "int");
        id.is_identity = true;
        let mut schema = DatabaseSchema::new("db");
        schema.tables.push(make_test_table("dbo", "T", vec![id]));
        let opts = MappingOptions {
            generate_identity: false,
            ..options()
        };
        let mapped = SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(PostgresDialect), opts)
            .map(schema)
            .unwrap();
        assert!(!mapped.target.tables[0].columns[0].is_identity);
    }

    #[test]
    fn test_computed_columns() {
        let mut total = make_test_column("total", "decimal");
        total.precision = 10;
        total.scale = 2;
        total.computed_expression = Some("([qty]*[price])".into());
        let mut year = make_test_column("yr", "int");
        year.computed_expression = Some("(datepart(year,[created]))".into());
        let mut schema = DatabaseSchema::new("db");
        schema.tables.push(make_test_table("dbo", "Lines", vec![total, year]));

        let mapped = ms_to_pg(schema.clone());
        let cols = &mapped.target.tables[0].columns;
        assert_eq!(cols[0].computed_expression.as_deref(), Some("\"qty\"*\"price\""));
        assert_eq!(cols[1].computed_expression, None);
        assert_eq!(
            cols[1].comment.as_deref(),
            Some("Computed: (datepart(year,[created]))")
        );

        let opts = MappingOptions {
            only_comment_computed_expression: true,
            ..options()
        };
        let mapped = SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(PostgresDialect), opts)
            .map(schema)
            .unwrap();
        assert!(mapped.target.tables[0].columns.iter().all(|c| !c.is_computed()));
    }

    #[test]
    fn test_foreign_keys_follow_renames() {
        let mut schema = DatabaseSchema::new("db");
        schema
            .tables
            .push(make_test_table("dbo", "Customers", vec![make_test_column("id", "int")]));
        let mut orders = make_test_table("dbo", "Orders", vec![make_test_column("cust_id", "int")]);
        orders.foreign_keys.push(make_fk("FK_cust", "cust_id", "dbo", "Customers"));
        orders
            .foreign_keys
            .push(make_fk("FK_missing", "cust_id", "dbo", "Missing"));
        schema.tables.push(orders);

        let mapped = ms_to_pg(schema);
        let fks = &mapped.target.tables[1].foreign_keys;
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].ref_owner, "public");
        assert_eq!(fks[0].ref_table, "Customers");
        assert!(mapped.events.iter().any(|e| e.message.contains("FK_missing")));
    }

    #[test]
    fn test_routines_skipped_across_engines() {
        let mut schema = DatabaseSchema::new("db");
        schema.procedures.push(Routine {
            owner: "dbo".into(),
            name: "usp_cleanup".into(),
            definition: "CREATE PROCEDURE dbo.usp_cleanup AS SELECT 1".into(),
            references: vec![],
        });
        let mapped = ms_to_pg(schema.clone());
        assert!(mapped.target.procedures.is_empty());
        assert_eq!(mapped.skipped, 1);
        assert!(mapped.events[0].message.contains("requires manual translation"));

        let same = SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(MssqlDialect), MappingOptions {
            owner_mapping: vec![],
            ..options()
        })
        .map(schema)
        .unwrap();
        assert_eq!(same.target.procedures.len(), 1);
    }

    #[test]
    fn test_views_translated_and_rewrapped() {
        let mut schema = DatabaseSchema::new("db");
        schema.views.push(View {
            owner: "dbo".into(),
            name: "v_orders".into(),
            definition: "CREATE VIEW [dbo].[v_orders] AS SELECT [id] FROM [dbo].[Orders]".into(),
            references: vec![ObjectName::new("dbo", "Orders")],
            comment: None,
        });
        let mapped = ms_to_pg(schema);
        let view = &mapped.target.views[0];
        assert_eq!(view.owner, "public");
        assert_eq!(view.definition, "SELECT \"id\" FROM \"dbo\".\"Orders\"");
        assert_eq!(view.references[0], ObjectName::new("public", "Orders"));
    }

    #[test]
    fn test_sqlite_target_drops_owners_and_sequences() {
        let mut schema = DatabaseSchema::new("db");
        schema
            .tables
            .push(make_test_table("dbo", "T", vec![make_test_column("id", "bigint")]));
        schema.sequences.push(Sequence {
            owner: "dbo".into(),
            name: "seq".into(),
            data_type: "bigint".into(),
            start_value: 1,
            increment: 1,
            min_value: None,
            max_value: None,
            cycle: false,
        });
        let mapped = SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(SqliteDialect), MappingOptions {
            owner_mapping: vec![],
            ..options()
        })
        .map(schema)
        .unwrap();
        assert_eq!(mapped.target.tables[0].owner, "");
        assert_eq!(mapped.target.tables[0].columns[0].data_type, "INTEGER");
        assert!(mapped.target.sequences.is_empty());
        assert_eq!(mapped.skipped, 1);
    }

    #[test]
    fn test_invalid_table_skipped() {
        let mut schema = DatabaseSchema::new("db");
        let mut broken = make_test_table("dbo", "Broken", vec![make_test_column("a", "int")]);
        broken.columns[0].ordinal_pos = 5;
        schema.tables.push(broken);
        schema.tables.push(make_test_table("dbo", "Fine", vec![make_test_column("a", "int")]));
        let mapped = ms_to_pg(schema);
        assert_eq!(mapped.source.tables.len(), 1);
        assert_eq!(mapped.target.tables.len(), 1);
        assert_eq!(mapped.target.tables[0].name, "Fine");
        assert_eq!(mapped.skipped, 1);
    }

    #[test]
    fn test_foreign_key_into_skipped_table_is_pruned() {
        let mut schema = DatabaseSchema::new("db");
        let mut parent = make_test_table(
            "dbo",
            "parent",
            vec![make_test_column("id", "int"), make_test_column("label", "nvarchar")],
        );
        parent.columns[1].ordinal_pos = 7;
        schema.tables.push(parent);
        let mut child = make_test_table("dbo", "child", vec![make_test_column("parent_id", "int")]);
        child.foreign_keys.push(make_fk("fk_child_parent", "parent_id", "dbo", "parent"));
        schema.tables.push(child);

        let mapped = ms_to_pg(schema);
        assert_eq!(mapped.skipped, 1);
        assert_eq!(mapped.target.tables.len(), 1);
        assert_eq!(mapped.target.tables[0].name, "child");
        assert!(mapped.target.tables[0].foreign_keys.is_empty());
        assert!(mapped.source.tables[0].foreign_keys.is_empty());
        assert!(mapped
            .events
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("fk_child_parent")));
    }

    #[test]
    fn test_owners_merged_by_mapping_get_unique_names() {
        let mut schema = DatabaseSchema::new("db");
        schema
            .tables
            .push(make_test_table("dbo", "orders", vec![make_test_column("id", "int")]));
        let mut sales = make_test_table("sales", "orders", vec![make_test_column("id", "int")]);
        sales.foreign_keys.push(make_fk("fk_self", "id", "sales", "orders"));
        schema.tables.push(sales);

        let mut opts = options();
        opts.owner_mapping.push(("sales".into(), "public".into()));
        let mapped = SchemaMapper::new(Arc::new(MssqlDialect), Arc::new(PostgresDialect), opts)
            .map(schema)
            .unwrap();

        let names: Vec<String> = mapped.target.tables.iter().map(|t| t.full_name()).collect();
        assert_eq!(names, vec!["public.orders", "public.orders_1"]);
        assert_eq!(mapped.target.tables[1].foreign_keys[0].ref_table, "orders_1");
        assert!(mapped.target.validate().is_ok());
        assert!(mapped
            .events
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("orders_1")));
    }
}
