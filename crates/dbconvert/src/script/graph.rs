//! Dependency ordering of schema objects.
//!
//! Objects are ranked so that every object comes after the objects it
//! depends on. Strongly connected components are found first: a component
//! made only of tables is a foreign-key cycle and is broken by deferring the
//! foreign keys inside it; any other component cannot be ordered, and its
//! members plus everything that depends on them are left out.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::schema::{DatabaseSchema, EdgeReason, ObjectKind, ObjectName, ObjectRef};

/// A foreign key that is added after all tables exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredKey {
    pub table: ObjectName,
    pub constraint: String,
}

/// Objects in dependency order plus what could not be ordered.
#[derive(Debug, Clone, Default)]
pub struct DependencyOrder {
    /// Orderable objects with their rank, lowest rank first.
    pub ordered: Vec<(ObjectRef, usize)>,
    /// Foreign keys removed from the table definitions to break cycles.
    pub deferred: Vec<DeferredKey>,
    /// Unresolvable cycles, each listing its members.
    pub cycles: Vec<Vec<ObjectRef>>,
    /// Objects left out because they depend on a cycle.
    pub blocked_dependents: Vec<ObjectRef>,
    /// Tables grouped into levels: a table's parents are all in earlier levels.
    pub table_levels: Vec<Vec<ObjectName>>,
}

impl DependencyOrder {
    pub fn rank_of(&self, object: &ObjectRef) -> Option<usize> {
        self.ordered
            .iter()
            .find(|(r, _)| r == object)
            .map(|(_, rank)| *rank)
    }

    pub fn is_deferred(&self, table: &ObjectName, constraint: &str) -> bool {
        self.deferred
            .iter()
            .any(|d| &d.table == table && d.constraint == constraint)
    }
}

/// Order every object of `schema`.
///
/// With `defer_cycles` false (engines that cannot add a foreign key to an
/// existing table), cyclic foreign keys stay inline; those engines accept
/// references to tables that do not exist yet.
pub fn order_objects(schema: &DatabaseSchema, defer_cycles: bool) -> DependencyOrder {
    let nodes = schema.object_refs();
    let index: HashMap<&ObjectRef, usize> = nodes.iter().enumerate().map(|(i, r)| (r, i)).collect();

    // deps[i] = objects node i depends on, with the FK name when it is one.
    let mut deps: Vec<Vec<(usize, Option<String>)>> = vec![Vec::new(); nodes.len()];
    for edge in schema.dependency_edges() {
        let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
            continue;
        };
        let fk = match edge.reason {
            EdgeReason::ForeignKey(name) => Some(name),
            _ => None,
        };
        deps[from].push((to, fk));
    }

    let components = strongly_connected(&deps);
    let mut order = DependencyOrder::default();
    let mut cyclic = HashSet::new();

    for component in components.iter().filter(|c| c.len() > 1) {
        let members: HashSet<usize> = component.iter().copied().collect();
        let only_tables = component.iter().all(|&i| nodes[i].kind == ObjectKind::Table);
        if only_tables {
            for &i in component {
                let mut kept = Vec::new();
                for (to, fk) in std::mem::take(&mut deps[i]) {
                    match fk {
                        Some(constraint) if members.contains(&to) => {
                            if defer_cycles {
                                order.deferred.push(DeferredKey {
                                    table: nodes[i].name.clone(),
                                    constraint,
                                });
                            }
                        }
                        fk => kept.push((to, fk)),
                    }
                }
                deps[i] = kept;
            }
        } else {
            let mut names: Vec<ObjectRef> = component.iter().map(|&i| nodes[i].clone()).collect();
            names.sort();
            order.cycles.push(names);
            cyclic.extend(members);
        }
    }

    let blocked = dependents_of(&deps, &cyclic);
    let mut dependents: Vec<ObjectRef> = blocked
        .iter()
        .filter(|i| !cyclic.contains(*i))
        .map(|&i| nodes[i].clone())
        .collect();
    dependents.sort();
    order.blocked_dependents = dependents;

    let ranks = rank(&deps, &blocked);
    let mut ordered: Vec<(usize, usize)> = ranks.into_iter().collect();
    // Rank, then kind, then catalog order.
    ordered.sort_by_key(|&(i, r)| (r, nodes[i].kind, i));
    order.ordered = ordered.iter().map(|&(i, r)| (nodes[i].clone(), r)).collect();

    order.table_levels = table_levels(&nodes, &deps, &blocked);
    order
}

/// Tarjan's algorithm. Components come out in reverse topological order.
fn strongly_connected(deps: &[Vec<(usize, Option<String>)>]) -> Vec<Vec<usize>> {
    struct State {
        counter: usize,
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    fn visit(v: usize, deps: &[Vec<(usize, Option<String>)>], s: &mut State) {
        s.index[v] = Some(s.counter);
        s.low[v] = s.counter;
        s.counter += 1;
        s.stack.push(v);
        s.on_stack[v] = true;

        for &(w, _) in &deps[v] {
            match s.index[w] {
                None => {
                    visit(w, deps, s);
                    s.low[v] = s.low[v].min(s.low[w]);
                }
                Some(idx) if s.on_stack[w] => s.low[v] = s.low[v].min(idx),
                Some(_) => {}
            }
        }

        if Some(s.low[v]) == s.index[v] {
            let mut component = Vec::new();
            while let Some(w) = s.stack.pop() {
                s.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            s.components.push(component);
        }
    }

    let n = deps.len();
    let mut state = State {
        counter: 0,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        components: Vec::new(),
    };
    for v in 0..n {
        if state.index[v].is_none() {
            visit(v, deps, &mut state);
        }
    }
    state.components
}

/// `roots` plus every node that transitively depends on one of them.
fn dependents_of(deps: &[Vec<(usize, Option<String>)>], roots: &HashSet<usize>) -> HashSet<usize> {
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (from, list) in deps.iter().enumerate() {
        for &(to, _) in list {
            reverse[to].push(from);
        }
    }
    let mut seen: HashSet<usize> = roots.clone();
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(v) = queue.pop_front() {
        for &dependent in &reverse[v] {
            if seen.insert(dependent) {
                queue.push_back(dependent);
            }
        }
    }
    seen
}

/// Kahn's algorithm over the acyclic remainder. A node's rank is one more
/// than the highest rank among its dependencies.
fn rank(deps: &[Vec<(usize, Option<String>)>], excluded: &HashSet<usize>) -> HashMap<usize, usize> {
    let n = deps.len();
    let mut pending = vec![0usize; n];
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, list) in deps.iter().enumerate() {
        if excluded.contains(&from) {
            continue;
        }
        for &(to, _) in list {
            pending[from] += 1;
            reverse[to].push(from);
        }
    }

    let mut ranks = HashMap::new();
    let mut queue: VecDeque<usize> = (0..n)
        .filter(|i| !excluded.contains(i) && pending[*i] == 0)
        .collect();
    for &i in &queue {
        ranks.insert(i, 0);
    }
    while let Some(v) = queue.pop_front() {
        let next = ranks.get(&v).copied().unwrap_or(0) + 1;
        for &dependent in &reverse[v] {
            if excluded.contains(&dependent) {
                continue;
            }
            let entry = ranks.entry(dependent).or_insert(0);
            *entry = (*entry).max(next);
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }
    ranks
}

fn table_levels(
    nodes: &[ObjectRef],
    deps: &[Vec<(usize, Option<String>)>],
    excluded: &HashSet<usize>,
) -> Vec<Vec<ObjectName>> {
    // Only table-to-table edges matter for data loading.
    let fk_only: Vec<Vec<(usize, Option<String>)>> = deps
        .iter()
        .enumerate()
        .map(|(i, list)| {
            if nodes[i].kind != ObjectKind::Table {
                return Vec::new();
            }
            list.iter()
                .filter(|(to, _)| nodes[*to].kind == ObjectKind::Table)
                .cloned()
                .collect()
        })
        .collect();
    let excluded: HashSet<usize> = excluded
        .iter()
        .copied()
        .chain((0..nodes.len()).filter(|&i| nodes[i].kind != ObjectKind::Table))
        .collect();

    let ranks = rank(&fk_only, &excluded);
    let depth = ranks.values().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut levels: Vec<Vec<ObjectName>> = vec![Vec::new(); depth];
    let mut by_index: Vec<(usize, usize)> = ranks.into_iter().collect();
    by_index.sort_unstable();
    for (i, r) in by_index {
        levels[r].push(nodes[i].name.clone());
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::View;
    use crate::testing::{make_fk, make_test_column, make_test_table};

    fn table(kind_name: &str) -> ObjectRef {
        ObjectRef::new(ObjectKind::Table, ObjectName::new("dbo", kind_name))
    }

    fn view(name: &str, refs: &[&str]) -> View {
        View {
            owner: "dbo".into(),
            name: name.into(),
            definition: "SELECT 1".into(),
            references: refs.iter().map(|r| ObjectName::new("dbo", *r)).collect(),
            comment: None,
        }
    }

    fn schema_with_orders() -> DatabaseSchema {
        let mut schema = DatabaseSchema::new("db");
        let mut lines = make_test_table("dbo", "Lines", vec![make_test_column("order_id", "int")]);
        lines.foreign_keys.push(make_fk("FK_lines_orders", "order_id", "dbo", "Orders"));
        let mut orders = make_test_table("dbo", "Orders", vec![make_test_column("customer_id", "int")]);
        orders
            .foreign_keys
            .push(make_fk("FK_orders_customers", "customer_id", "dbo", "Customers"));
        schema.tables.push(lines);
        schema.tables.push(orders);
        schema
            .tables
            .push(make_test_table("dbo", "Customers", vec![make_test_column("id", "int")]));
        schema
    }

    #[test]
    fn test_parents_before_children() {
        let mut schema = schema_with_orders();
        schema.views.push(view("v_lines", &["Lines", "Orders"]));
        let order = order_objects(&schema, true);

        let names: Vec<String> = order.ordered.iter().map(|(r, _)| r.name.name.clone()).collect();
        assert_eq!(names, vec!["Customers", "Orders", "Lines", "v_lines"]);
        assert_eq!(order.rank_of(&table("Customers")), Some(0));
        assert_eq!(order.rank_of(&table("Lines")), Some(2));
        assert!(order.deferred.is_empty());
        assert_eq!(
            order.table_levels,
            vec![
                vec![ObjectName::new("dbo", "Customers")],
                vec![ObjectName::new("dbo", "Orders")],
                vec![ObjectName::new("dbo", "Lines")],
            ]
        );
    }

    #[test]
    fn test_foreign_key_cycle_is_deferred() {
        let mut schema = DatabaseSchema::new("db");
        let mut a = make_test_table("dbo", "A", vec![make_test_column("b_id", "int")]);
        a.foreign_keys.push(make_fk("FK_a_b", "b_id", "dbo", "B"));
        let mut b = make_test_table("dbo", "B", vec![make_test_column("a_id", "int")]);
        b.foreign_keys.push(make_fk("FK_b_a", "a_id", "dbo", "A"));
        schema.tables.push(a);
        schema.tables.push(b);

        let order = order_objects(&schema, true);
        assert!(order.cycles.is_empty());
        assert_eq!(order.deferred.len(), 2);
        assert!(order.is_deferred(&ObjectName::new("dbo", "A"), "FK_a_b"));
        assert_eq!(order.ordered.len(), 2);
        assert_eq!(order.table_levels.len(), 1);

        let inline = order_objects(&schema, false);
        assert!(inline.deferred.is_empty());
        assert_eq!(inline.ordered.len(), 2);
    }

    #[test]
    fn test_view_cycle_skips_members_and_dependents() {
        let mut schema = schema_with_orders();
        schema.views.push(view("v_a", &["v_b"]));
        schema.views.push(view("v_b", &["v_a"]));
        schema.views.push(view("v_c", &["v_a"]));
        schema.views.push(view("v_ok", &["Orders"]));

        let order = order_objects(&schema, true);
        assert_eq!(order.cycles.len(), 1);
        let members: Vec<&str> = order.cycles[0].iter().map(|r| r.name.name.as_str()).collect();
        assert_eq!(members, vec!["v_a", "v_b"]);
        assert_eq!(order.blocked_dependents.len(), 1);
        assert_eq!(order.blocked_dependents[0].name.name, "v_c");

        let names: Vec<&str> = order.ordered.iter().map(|(r, _)| r.name.name.as_str()).collect();
        assert!(names.contains(&"v_ok"));
        assert!(!names.contains(&"v_a"));
        assert!(!names.contains(&"v_c"));
    }

    #[test]
    fn test_independent_tables_share_a_level() {
        let mut schema = DatabaseSchema::new("db");
        for name in ["X", "Y", "Z"] {
            schema
                .tables
                .push(make_test_table("dbo", name, vec![make_test_column("id", "int")]));
        }
        let order = order_objects(&schema, true);
        assert_eq!(order.table_levels.len(), 1);
        assert_eq!(order.table_levels[0].len(), 3);
    }
}
