//! Owner remapping plus target casing and length rules for identifiers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::schema::ObjectName;
use crate::core::traits::{Dialect, IdentifierCase};

/// Maps source identifiers to target identifiers.
///
/// Results are memoized per scope, so the same source name always maps to
/// the same target name within a run. Mapping its output again with a fresh
/// mapper returns it unchanged.
pub struct IdentifierMapper {
    target: Arc<dyn Dialect>,
    /// Source owner (lowercase) to target owner.
    owners: HashMap<String, String>,
    /// Fold case for unquoted identifiers.
    fold_case: bool,
    memo: HashMap<(String, String), String>,
    used: HashMap<String, HashSet<String>>,
    warnings: Vec<String>,
}

impl IdentifierMapper {
    /// `owner_mapping` holds (source owner, target owner) pairs. Case is
    /// folded only when identifiers are emitted unquoted.
    pub fn new(target: Arc<dyn Dialect>, owner_mapping: &[(String, String)], quote_identifiers: bool) -> Self {
        let owners = owner_mapping
            .iter()
            .map(|(s, t)| (s.to_lowercase(), t.clone()))
            .collect();
        Self {
            target,
            owners,
            fold_case: !quote_identifiers,
            memo: HashMap::new(),
            used: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Target owner for a source owner.
    ///
    /// Engines without owner namespaces get an empty owner. An empty source
    /// owner becomes the target's default owner.
    pub fn map_owner(&mut self, owner: &str) -> String {
        if !self.target.supports_owners() {
            return String::new();
        }
        let remapped = if let Some(target) = self.owners.get(&owner.to_lowercase()) {
            target.clone()
        } else if owner.is_empty() {
            self.target.default_owner().to_string()
        } else {
            // Unmapped and already-mapped owners pass through.
            owner.to_string()
        };
        self.map_name("owner", &remapped)
    }

    /// Target name for `name` within `scope`.
    ///
    /// Names in the same scope must stay distinct: when truncation or owner
    /// remapping makes two names collide, the later one gets a numeric suffix.
    pub fn map_name(&mut self, scope: &str, name: &str) -> String {
        self.map_keyed(scope, &name.to_lowercase(), name)
    }

    /// Target owner and name for an object. Objects share one namespace
    /// per target owner, so two source owners mapped onto the same target
    /// owner cannot produce the same name.
    pub fn map_identifier(&mut self, source: &ObjectName) -> ObjectName {
        let owner = self.map_owner(&source.owner);
        let scope = format!("object:{}", owner.to_lowercase());
        let key = format!("{}.{}", source.owner.to_lowercase(), source.name.to_lowercase());
        let name = self.map_keyed(&scope, &key, &source.name);
        ObjectName::new(owner, name)
    }

    /// Column name within a source table.
    pub fn map_column(&mut self, table: &ObjectName, column: &str) -> String {
        let scope = format!("column:{}", table.to_string().to_lowercase());
        self.map_name(&scope, column)
    }

    /// Constraint or index name; these share a namespace per target owner.
    pub fn map_constraint(&mut self, owner: &str, name: &str) -> String {
        let target_owner = self.map_owner(owner);
        let scope = format!("constraint:{}", target_owner.to_lowercase());
        let key = format!("{}.{}", owner.to_lowercase(), name.to_lowercase());
        self.map_keyed(&scope, &key, name)
    }

    /// `key` identifies the source object; it is case-insensitive so every
    /// reference to one object maps to the same name.
    fn map_keyed(&mut self, scope: &str, key: &str, name: &str) -> String {
        let memo_key = (scope.to_string(), key.to_string());
        if let Some(mapped) = self.memo.get(&memo_key) {
            return mapped.clone();
        }

        let folded = self.fold(name);
        let max = self.target.max_identifier_length();
        let base = truncate(&folded, max);
        let truncated = base != folded;

        let used = self.used.entry(scope.to_string()).or_default();
        let mut mapped = base.clone();
        let mut counter = 1;
        while used.contains(&mapped.to_lowercase()) {
            let suffix = format!("_{}", counter);
            mapped = format!("{}{}", truncate(&folded, max.saturating_sub(suffix.chars().count())), suffix);
            counter += 1;
        }
        used.insert(mapped.to_lowercase());

        if truncated {
            self.warnings.push(format!(
                "Identifier '{}' exceeds {} characters; truncated to '{}'",
                name, max, mapped
            ));
        } else if mapped != base {
            self.warnings.push(format!(
                "Identifier '{}' collides with another object in the target; renamed to '{}'",
                name, mapped
            ));
        }
        self.memo.insert(memo_key, mapped.clone());
        mapped
    }

    /// Truncation and collision warnings produced since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn fold(&self, name: &str) -> String {
        if !self.fold_case {
            return name.to_string();
        }
        match self.target.unquoted_case() {
            IdentifierCase::Preserve => name.to_string(),
            IdentifierCase::Lower => name.to_lowercase(),
            IdentifierCase::Upper => name.to_uppercase(),
        }
    }
}

fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}
