//! Dialect-driven DDL and DML rendering.
//!
//! Rendering is pure: it takes target-annotated schema objects (names, types
//! and expressions already in the target's vocabulary) and asks the
//! [`Dialect`] only for syntax.

use crate::core::schema::{
    ForeignKey, Index, Routine, Sequence, Table, Trigger, UserDefinedType, View,
};
use crate::core::traits::Dialect;
use crate::core::value::Row;

/// Rendering switches taken from the conversion options.
#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    /// Quote identifiers; when false they are emitted bare.
    pub quote_identifiers: bool,
    pub generate_identity: bool,
    pub generate_comment: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            quote_identifiers: true,
            generate_identity: true,
            generate_comment: true,
        }
    }
}

/// One renderable schema object.
#[derive(Debug, Clone, Copy)]
pub enum SchemaObject<'a> {
    /// Table with its columns, keys, checks, inline foreign keys and indexes.
    Table(&'a Table),
    /// Foreign key added to an existing table.
    ForeignKey(&'a Table, &'a ForeignKey),
    View(&'a View),
    Function(&'a Routine),
    Procedure(&'a Routine),
    Trigger(&'a Trigger),
    Sequence(&'a Sequence),
    UserType(&'a UserDefinedType),
}

/// Quote an identifier when quoting is enabled.
pub fn ident<D: Dialect + ?Sized>(dialect: &D, name: &str, quote: bool) -> String {
    if quote {
        dialect.quote_ident(name)
    } else {
        name.to_string()
    }
}

/// Owner-qualified name; the owner is omitted for engines without owners.
pub fn qualify<D: Dialect + ?Sized>(dialect: &D, owner: &str, name: &str, quote: bool) -> String {
    if owner.is_empty() || !dialect.supports_owners() {
        ident(dialect, name, quote)
    } else {
        format!("{}.{}", ident(dialect, owner, quote), ident(dialect, name, quote))
    }
}

pub(crate) fn column_list<D: Dialect + ?Sized>(dialect: &D, columns: &[String], quote: bool) -> String {
    columns
        .iter()
        .map(|c| ident(dialect, c, quote))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the statements creating one object.
pub fn render_object(dialect: &dyn Dialect, object: SchemaObject<'_>, opts: &ScriptOptions) -> Vec<String> {
    match object {
        SchemaObject::Table(table) => render_table(dialect, table, opts),
        SchemaObject::ForeignKey(table, fk) => vec![format!(
            "ALTER TABLE {} ADD {}",
            qualify(dialect, &table.owner, &table.name, opts.quote_identifiers),
            foreign_key_clause(dialect, fk, opts.quote_identifiers)
        )],
        SchemaObject::View(view) => vec![format!(
            "CREATE VIEW {} AS\n{}",
            qualify(dialect, &view.owner, &view.name, opts.quote_identifiers),
            view.definition.trim()
        )],
        SchemaObject::Function(routine) | SchemaObject::Procedure(routine) => {
            vec![routine.definition.trim().to_string()]
        }
        SchemaObject::Trigger(trigger) => vec![trigger.definition.trim().to_string()],
        SchemaObject::Sequence(seq) => render_sequence(dialect, seq, opts),
        SchemaObject::UserType(udt) => {
            let base = udt_base_type(udt);
            dialect
                .create_user_type_sql(udt, &base, opts.quote_identifiers)
                .into_iter()
                .collect()
        }
    }
}

fn udt_base_type(udt: &UserDefinedType) -> String {
    if udt.max_length == -1 {
        format!("{}(max)", udt.base_type)
    } else if udt.max_length > 0 {
        format!("{}({})", udt.base_type, udt.max_length)
    } else if udt.precision > 0 {
        format!("{}({},{})", udt.base_type, udt.precision, udt.scale)
    } else {
        udt.base_type.clone()
    }
}

fn render_table(dialect: &dyn Dialect, table: &Table, opts: &ScriptOptions) -> Vec<String> {
    let quote = opts.quote_identifiers;
    let qualified = qualify(dialect, &table.owner, &table.name, quote);
    let mut defs = Vec::with_capacity(table.columns.len() + 4);
    let mut pk_inline = false;

    for col in &table.columns {
        if opts.generate_identity && col.is_identity {
            let single_pk = table.pk_columns().len() == 1
                && table.pk_columns()[0].eq_ignore_ascii_case(&col.name);
            if single_pk {
                if let Some(def) = dialect.identity_primary_key_column(col, quote) {
                    defs.push(def);
                    pk_inline = true;
                    continue;
                }
            }
        }

        if let Some(expr) = &col.computed_expression {
            defs.push(dialect.computed_column(col, expr, quote));
            continue;
        }

        let mut def = format!("{} {}", ident(dialect, &col.name, quote), col.data_type);
        if opts.generate_identity && col.is_identity {
            def.push_str(&dialect.identity_clause(col));
        }
        def.push_str(if col.is_nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = &col.default_expression {
            if !col.is_identity || !opts.generate_identity {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
        }
        if opts.generate_comment {
            if let Some(clause) = col.comment.as_deref().and_then(|c| dialect.inline_column_comment(c)) {
                def.push_str(&clause);
            }
        }
        defs.push(def);
    }

    if let Some(pk) = table.primary_key.as_ref().filter(|pk| !pk.columns.is_empty()) {
        if !pk_inline {
            let cols = column_list(dialect, &pk.columns, quote);
            defs.push(if pk.name.is_empty() {
                format!("PRIMARY KEY ({})", cols)
            } else {
                format!("CONSTRAINT {} PRIMARY KEY ({})", ident(dialect, &pk.name, quote), cols)
            });
        }
    }

    for chk in &table.check_constraints {
        defs.push(format!(
            "CONSTRAINT {} CHECK ({})",
            ident(dialect, &chk.name, quote),
            chk.definition
        ));
    }

    for fk in &table.foreign_keys {
        defs.push(foreign_key_clause(dialect, fk, quote));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualified,
        defs.join(",\n    ")
    )];

    for idx in &table.indexes {
        statements.push(index_statement(dialect, table, idx, quote));
    }

    if opts.generate_comment {
        statements.extend(dialect.comment_statements(table, quote));
    }

    statements
}

fn foreign_key_clause<D: Dialect + ?Sized>(dialect: &D, fk: &ForeignKey, quote: bool) -> String {
    let mut clause = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        ident(dialect, &fk.name, quote),
        column_list(dialect, &fk.columns, quote),
        qualify(dialect, &fk.ref_owner, &fk.ref_table, quote),
        column_list(dialect, &fk.ref_columns, quote)
    );
    if let Some(action) = referential_action(&fk.on_delete) {
        clause.push_str(" ON DELETE ");
        clause.push_str(action);
    }
    if let Some(action) = referential_action(&fk.on_update) {
        clause.push_str(" ON UPDATE ");
        clause.push_str(action);
    }
    clause
}

/// Normalize a catalog referential action; `None` for the default behavior.
fn referential_action(action: &str) -> Option<&'static str> {
    match action.trim().to_uppercase().replace('_', " ").as_str() {
        "CASCADE" => Some("CASCADE"),
        "SET NULL" => Some("SET NULL"),
        "SET DEFAULT" => Some("SET DEFAULT"),
        _ => None,
    }
}

fn index_statement(dialect: &dyn Dialect, table: &Table, idx: &Index, quote: bool) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if idx.is_unique { "UNIQUE " } else { "" },
        ident(dialect, &idx.name, quote),
        qualify(dialect, &table.owner, &table.name, quote),
        column_list(dialect, &idx.columns, quote)
    );
    if !idx.include_cols.is_empty() && dialect.supports_include_columns() {
        sql.push_str(&format!(" INCLUDE ({})", column_list(dialect, &idx.include_cols, quote)));
    }
    sql
}

fn render_sequence(dialect: &dyn Dialect, seq: &Sequence, opts: &ScriptOptions) -> Vec<String> {
    if !dialect.supports_sequences() {
        return Vec::new();
    }
    let mut sql = format!(
        "CREATE SEQUENCE {} START WITH {} INCREMENT BY {}",
        qualify(dialect, &seq.owner, &seq.name, opts.quote_identifiers),
        seq.start_value,
        seq.increment
    );
    if let Some(min) = seq.min_value {
        sql.push_str(&format!(" MINVALUE {}", min));
    }
    if let Some(max) = seq.max_value {
        sql.push_str(&format!(" MAXVALUE {}", max));
    }
    sql.push_str(if seq.cycle { " CYCLE" } else { " NO CYCLE" });
    vec![sql]
}

/// Multi-row `INSERT ... VALUES` for rows in `table.columns` order.
pub fn insert_statement<D: Dialect + ?Sized>(dialect: &D, table: &Table, rows: &[Row], quote: bool) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    let values = rows
        .iter()
        .map(|row| {
            let literals: Vec<String> = row.iter().map(|v| dialect.render_literal(v)).collect();
            format!("({})", literals.join(", "))
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "INSERT INTO {} ({}) VALUES\n{}",
        qualify(dialect, &table.owner, &table.name, quote),
        column_list(dialect, &columns, quote),
        values
    )
}
