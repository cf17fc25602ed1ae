//! The query compiler.
//!
//! Walks a join tree once, in pre-order, and emits a single SQL `SELECT`
//! together with the alias table the row inflater later resolves columns
//! through. The compiled pair is immutable and reusable across executions.

use crate::alias::AliasTable;
use crate::tree::{JoinTree, JoinType, NodeId};
use entgraph_core::{Dialect, Error, Result};
use std::collections::{HashMap, HashSet};

/// A compiled aggregate query: SQL text plus its alias table.
#[derive(Debug)]
pub struct CompiledSelect {
    pub sql: String,
    pub aliases: AliasTable,
}

/// Compiles join trees against one dialect.
pub struct QueryCompiler<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> QueryCompiler<'a> {
    /// Create a compiler for a dialect.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Compile a tree into `(sql, alias table)`.
    pub fn compile(&self, tree: &JoinTree) -> Result<CompiledSelect> {
        self.compile_filtered(tree, None)
    }

    /// Compile a tree, appending a caller-rendered WHERE predicate.
    ///
    /// The predicate expression model is an external collaborator; the text
    /// arrives here already rendered, with its bind placeholders in place.
    pub fn compile_filtered(
        &self,
        tree: &JoinTree,
        predicate: Option<&str>,
    ) -> Result<CompiledSelect> {
        let root = tree.root().ok_or_else(Error::empty_tree)?;
        let order = tree.pre_order();
        let mut aliases = AliasTable::with_capacity(tree.len());

        // Pass 1: assign qualifiers and prefixes, collapsing duplicate
        // joins. Two sibling nodes reaching the same table through the same
        // key pair (as `project` produces) share one join clause and
        // qualifier while keeping their own column-alias prefixes.
        let mut merged: HashSet<usize> = HashSet::new();
        let mut join_index: HashMap<(usize, String, String, String, JoinType), String> =
            HashMap::new();
        for &id in &order {
            let node = tree.node(id);
            if id == root {
                aliases.set_qualifier(id, node.table().to_string());
                aliases.set_prefix(id, node.table().to_string());
                continue;
            }
            let path = tree.path(id)[1..].join("_");
            aliases.set_prefix(id, path.clone());

            let key = node.key().ok_or_else(|| {
                Error::Custom(format!("node '{}' has no join key", node.name()))
            })?;
            let parent = node.parent().expect("non-root node has a parent");
            let signature = (
                parent.index(),
                node.table().to_string(),
                key.left.clone(),
                key.right.clone(),
                key.join_type,
            );
            if let Some(shared) = join_index.get(&signature) {
                aliases.set_qualifier(id, shared.clone());
                merged.insert(id.index());
            } else {
                join_index.insert(signature, path.clone());
                aliases.set_qualifier(id, path);
            }
        }

        Self::check_qualifier_uniqueness(&order, &aliases, &merged)?;

        // Pass 2: select list, in pre-order.
        let mut select_parts = Vec::new();
        let mut seen_aliases = HashSet::new();
        for &id in &order {
            let node = tree.node(id);
            let qualifier = self.dialect.quote_ident(aliases.qualifier(id));
            for column in node.columns() {
                let alias = format!("{}_{}", aliases.prefix(id), column);
                if !seen_aliases.insert(alias.clone()) {
                    return Err(Error::ambiguous_alias(&alias));
                }
                select_parts.push(format!(
                    "{}.{} AS {}",
                    qualifier,
                    self.dialect.quote_ident(column),
                    self.dialect.quote_ident(&alias)
                ));
                aliases.insert_column(id, column, alias);
            }
            if let Some(poly) = node.polymorphic() {
                // The discriminator is selected for inflation-time subtype
                // dispatch, deliberately outside the alias scheme.
                select_parts.push(format!(
                    "{}.{}",
                    qualifier,
                    self.dialect.quote_ident(&poly.discriminator)
                ));
            }
        }

        // FROM and JOIN clauses.
        let root_node = tree.node(root);
        let mut sql = format!("SELECT {} FROM ", select_parts.join(", "));
        if let Some(poly) = root_node.polymorphic() {
            sql.push_str(&format!(
                "({}) AS {}",
                poly.union_sql,
                self.dialect.quote_ident(aliases.qualifier(root))
            ));
        } else {
            sql.push_str(&self.dialect.quote_ident(root_node.table()));
        }

        for &id in &order {
            if id == root || merged.contains(&id.index()) {
                continue;
            }
            let node = tree.node(id);
            let key = node.key().expect("checked in pass 1");
            let parent = node.parent().expect("non-root node has a parent");
            sql.push_str(&format!(
                " {} {} AS {} ON {}.{} = {}.{}",
                key.join_type.as_str(),
                self.dialect.quote_ident(node.table()),
                self.dialect.quote_ident(aliases.qualifier(id)),
                self.dialect.quote_ident(aliases.qualifier(parent)),
                self.dialect.quote_ident(&key.left),
                self.dialect.quote_ident(aliases.qualifier(id)),
                self.dialect.quote_ident(&key.right),
            ));
        }

        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }

        tracing::debug!(sql = %sql, columns = aliases.len(), "compiled aggregate select");
        Ok(CompiledSelect { sql, aliases })
    }

    /// Qualifier collisions are unreachable under the path-based scheme
    /// unless two distinct name paths render to the same text (`a` + `b_c`
    /// vs `a_b` + `c`); surface those as configuration errors.
    fn check_qualifier_uniqueness(
        order: &[NodeId],
        aliases: &AliasTable,
        merged: &HashSet<usize>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for &id in order {
            if merged.contains(&id.index()) {
                continue;
            }
            if !seen.insert(aliases.qualifier(id).to_string()) {
                return Err(Error::ambiguous_alias(aliases.qualifier(id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{JoinKey, PolymorphicVariant, Relation};
    use entgraph_core::binding::EntityBinding;
    use entgraph_core::{AnsiDialect, MappingErrorKind, RelationFixer, Value, new_entity};

    #[derive(Debug)]
    struct Stub;

    fn binding(name: &'static str) -> EntityBinding {
        EntityBinding::keyed::<Stub, _>(name, "id", |_r| Ok(Stub))
    }

    fn fixer() -> RelationFixer {
        RelationFixer::to_one(|_p, _c| Ok(()))
    }

    fn compile(tree: &JoinTree) -> CompiledSelect {
        QueryCompiler::new(&AnsiDialect).compile(tree).unwrap()
    }

    fn country_capital_tree() -> JoinTree {
        let mut tree = JoinTree::with_root("Country", "Country", &["id"], binding("Country"));
        tree.add_relation(
            "Country",
            Relation::entity(
                "capital",
                "City",
                JoinKey::left_outer("capital_id", "id"),
                binding("City"),
                fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        tree
    }

    #[test]
    fn country_capital_sql() {
        let compiled = compile(&country_capital_tree());
        assert_eq!(
            compiled.sql,
            "SELECT Country.id AS Country_id, capital.id AS capital_id, \
             capital.name AS capital_name \
             FROM Country LEFT OUTER JOIN City AS capital ON Country.capital_id = capital.id"
        );

        let tree = country_capital_tree();
        let root = tree.root().unwrap();
        let capital = tree.node_by_name("capital").unwrap();
        assert_eq!(compiled.aliases.column_alias(root, "id"), Some("Country_id"));
        assert_eq!(compiled.aliases.column_alias(capital, "name"), Some("capital_name"));
    }

    #[test]
    fn same_table_at_two_paths_gets_disjoint_aliases() {
        // Self-relation: a city and its sister city share the City table.
        let mut tree = JoinTree::with_root("City", "City", &["id"], binding("City"));
        tree.add_relation(
            "City",
            Relation::entity(
                "sister",
                "City",
                JoinKey::left_outer("sister_id", "id"),
                binding("City"),
                fixer(),
            )
            .columns(&["id"]),
        )
        .unwrap();
        tree.add_relation(
            "sister",
            Relation::entity(
                "twin",
                "City",
                JoinKey::left_outer("sister_id", "id"),
                binding("City"),
                fixer(),
            )
            .columns(&["id"]),
        )
        .unwrap();

        let compiled = compile(&tree);
        let sister = tree.node_by_name("sister").unwrap();
        let twin = tree.node_by_name("twin").unwrap();
        assert_eq!(compiled.aliases.column_alias(sister, "id"), Some("sister_id"));
        assert_eq!(compiled.aliases.column_alias(twin, "id"), Some("sister_twin_id"));
        assert!(compiled.sql.contains("LEFT OUTER JOIN City AS sister ON City.sister_id = sister.id"));
        assert!(compiled.sql.contains("LEFT OUTER JOIN City AS sister_twin ON sister.sister_id = sister_twin.id"));
    }

    #[test]
    fn empty_tree_is_rejected() {
        let tree = JoinTree::new();
        let err = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::EmptyTree));
    }

    #[test]
    fn textual_path_collision_is_ambiguous() {
        // Node names "a" + "b_c" and "a_b" + "c" both render to "a_b_c".
        let mut tree = JoinTree::with_root("Root", "Root", &["id"], binding("Root"));
        tree.add_relation(
            "Root",
            Relation::entity("a", "T1", JoinKey::inner("x", "y"), binding("T1"), fixer())
                .columns(&["id"]),
        )
        .unwrap();
        tree.add_relation(
            "a",
            Relation::entity("b_c", "T2", JoinKey::inner("x", "y"), binding("T2"), fixer())
                .columns(&["id"]),
        )
        .unwrap();
        tree.add_relation(
            "Root",
            Relation::entity("a_b", "T3", JoinKey::inner("x", "y"), binding("T3"), fixer())
                .columns(&["id"]),
        )
        .unwrap();
        tree.add_relation(
            "a_b",
            Relation::entity("c", "T4", JoinKey::inner("x", "y"), binding("T4"), fixer())
                .columns(&["id"]),
        )
        .unwrap();

        let err = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::AmbiguousAlias));
    }

    #[test]
    fn projected_duplicate_join_is_collapsed() {
        let mut tree = country_capital_tree();

        // An independently built City aggregate reaching City through the
        // same key pair as the existing `capital` relation.
        let mut city = JoinTree::with_root("CityAgg", "Country", &[], binding("Country"));
        city.add_relation(
            "CityAgg",
            Relation::entity(
                "home",
                "City",
                JoinKey::left_outer("capital_id", "id"),
                binding("City"),
                fixer(),
            )
            .columns(&["name"]),
        )
        .unwrap();
        tree.project(city, "Country").unwrap();

        let compiled = compile(&tree);
        // One join clause only, shared by both nodes.
        assert_eq!(compiled.sql.matches("JOIN City").count(), 1);

        let home = tree.node_by_name("home").unwrap();
        let capital = tree.node_by_name("capital").unwrap();
        // The merged node reads through the first node's qualifier but keeps
        // its own column aliases.
        assert_eq!(compiled.aliases.qualifier(home), "capital");
        assert_eq!(compiled.aliases.qualifier(capital), "capital");
        assert_eq!(compiled.aliases.column_alias(home, "name"), Some("home_name"));
        assert!(compiled.sql.contains("capital.name AS home_name"));
    }

    #[test]
    fn keywords_are_quoted_in_output() {
        let mut tree = JoinTree::with_root("order", "order", &["id"], binding("Order"));
        tree.add_relation(
            "order",
            Relation::entity(
                "owner",
                "user",
                JoinKey::inner("user_id", "id"),
                binding("User"),
                fixer(),
            )
            .columns(&["id"]),
        )
        .unwrap();

        let compiled = compile(&tree);
        assert!(compiled.sql.contains("FROM \"order\""));
        assert!(compiled.sql.contains("INNER JOIN \"user\" AS owner"));
        assert!(compiled.sql.contains("\"order\".user_id = owner.id"));
    }

    #[test]
    fn polymorphic_root_emits_union_and_discriminator() {
        let tree = JoinTree::with_polymorphic_root(
            "Vehicle",
            "SELECT id, kind, wheels, NULL AS draft FROM Car \
             UNION ALL SELECT id, kind, NULL AS wheels, draft FROM Boat",
            "kind",
            &["id", "wheels", "draft"],
            |r| Ok(r.get_value("id").filter(|v| !v.is_null()).cloned()),
            vec![
                PolymorphicVariant::new("Car", Value::Text("car".into()), |_r, _e| {
                    Ok(new_entity(Stub))
                }),
                PolymorphicVariant::new("Boat", Value::Text("boat".into()), |_r, _e| {
                    Ok(new_entity(Stub))
                }),
            ],
        )
        .unwrap();

        let compiled = compile(&tree);
        assert!(compiled.sql.starts_with(
            "SELECT Vehicle.id AS Vehicle_id, Vehicle.wheels AS Vehicle_wheels, \
             Vehicle.draft AS Vehicle_draft, Vehicle.kind FROM (SELECT id, kind,"
        ));
        assert!(compiled.sql.contains(") AS Vehicle"));
        // The discriminator is selected bare, outside the alias table.
        let root = tree.root().unwrap();
        assert_eq!(compiled.aliases.column_alias(root, "kind"), None);
    }

    #[test]
    fn predicate_is_appended() {
        let compiled = QueryCompiler::new(&AnsiDialect)
            .compile_filtered(&country_capital_tree(), Some("Country.id = $1"))
            .unwrap();
        assert!(compiled.sql.ends_with(" WHERE Country.id = $1"));
    }
}
