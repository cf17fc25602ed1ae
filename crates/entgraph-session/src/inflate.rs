//! The row inflater.
//!
//! Walks the join tree once per result row, depth-first from the root,
//! turning the flat row stream back into an entity graph. Correctness rests
//! on three rules:
//!
//! 1. A null identifier stops the descent: an outer join with no matching
//!    right-hand row yields nulls transitively, so none of the node's
//!    descendants can match either.
//! 2. The identity cache collapses 1:N fan-out: repeated parent columns
//!    across many rows resolve to one shared instance.
//! 3. Relation fixers run at most once per distinct (parent, child) pair of
//!    an edge, so later rows only add to collections or no-op; inflation
//!    is idempotent with respect to row order.

use crate::identity::{EntityKey, IdentityCache};
use entgraph_core::binding::EntityBinding;
use entgraph_core::{EntityRef, Error, Result, Row, entity_ptr};
use entgraph_query::tree::{JoinNode, PolymorphicRoot};
use entgraph_query::{AliasTable, CompiledSelect, JoinTree, NodeId};
use std::collections::HashSet;

/// Inflates rows of one compiled aggregate query.
///
/// Holds only shared references; one inflater may serve concurrent
/// executions, each with its own [`IdentityCache`].
pub struct Inflater<'a> {
    tree: &'a JoinTree,
    aliases: &'a AliasTable,
}

impl<'a> Inflater<'a> {
    /// Create an inflater over a tree and its compiled alias table.
    #[must_use]
    pub fn new(tree: &'a JoinTree, aliases: &'a AliasTable) -> Self {
        Self { tree, aliases }
    }

    /// Create an inflater directly from a compiled select.
    #[must_use]
    pub fn for_compiled(tree: &'a JoinTree, compiled: &'a CompiledSelect) -> Self {
        Self::new(tree, &compiled.aliases)
    }

    /// Inflate one row, returning the (new or reused) root instance.
    pub fn inflate(&self, row: &Row, cache: &mut IdentityCache) -> Result<Option<EntityRef>> {
        let root = self.tree.root().ok_or_else(Error::empty_tree)?;
        Ok(self
            .inflate_node(root, row, cache, None)?
            .map(|(entity, _)| entity))
    }

    /// Inflate a full row stream into distinct roots, in first-seen order.
    pub fn inflate_rows(
        &self,
        rows: &[Row],
        cache: &mut IdentityCache,
    ) -> Result<Vec<EntityRef>> {
        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        for row in rows {
            if let Some(root) = self.inflate(row, cache)? {
                if seen.insert(entity_ptr(&root)) {
                    roots.push(root);
                }
            }
        }
        tracing::debug!(rows = rows.len(), roots = roots.len(), "inflated row stream");
        Ok(roots)
    }

    /// Inflate a row stream with a fresh identity cache.
    pub fn inflate_all(&self, rows: &[Row]) -> Result<Vec<EntityRef>> {
        let mut cache = IdentityCache::new();
        self.inflate_rows(rows, &mut cache)
    }

    fn inflate_node(
        &self,
        id: NodeId,
        row: &Row,
        cache: &mut IdentityCache,
        ancestor: Option<&(EntityRef, EntityKey)>,
    ) -> Result<Option<(EntityRef, EntityKey)>> {
        let node = self.tree.node(id);

        let resolved = if let Some(poly) = node.polymorphic() {
            self.inflate_polymorphic(id, node, poly, row, cache)?
        } else if let Some(binding) = node.binding() {
            self.inflate_entity(id, binding, row, cache)?
        } else {
            // Pure join node: contributes no entity, descendants wire into
            // the nearest entity ancestor.
            None
        };

        if resolved.is_none() && !node.is_pure_join() {
            // Null identifier: the whole subtree is absent from this row.
            return Ok(None);
        }

        let next_ancestor = resolved.as_ref().or(ancestor);
        for &child_id in node.children() {
            let child = self.inflate_node(child_id, row, cache, next_ancestor)?;
            let (Some((child_entity, child_key)), Some(fixer)) =
                (child, self.tree.node(child_id).fixer())
            else {
                continue;
            };
            if let Some((parent_entity, parent_key)) = next_ancestor {
                if cache.mark_wired(parent_key.clone(), child_key) {
                    fixer.apply(parent_entity, &child_entity)?;
                }
            }
        }

        Ok(resolved)
    }

    fn inflate_entity(
        &self,
        id: NodeId,
        binding: &EntityBinding,
        row: &Row,
        cache: &mut IdentityCache,
    ) -> Result<Option<(EntityRef, EntityKey)>> {
        let reader = self.aliases.reader(row, id);
        let Some(identifier) = binding.identifier(&reader)? else {
            return Ok(None);
        };
        if identifier.is_null() {
            return Ok(None);
        }

        let key = EntityKey::new(id, identifier);
        if let Some(existing) = cache.get(&key) {
            let existing = existing.clone();
            // Merge completes a partially built instance; the cached
            // reference stays canonical.
            binding.new_or_merge(&reader, Some(&existing))?;
            return Ok(Some((existing, key)));
        }

        let entity = binding.new_or_merge(&reader, None)?;
        cache.insert(key.clone(), entity.clone());
        Ok(Some((entity, key)))
    }

    fn inflate_polymorphic(
        &self,
        id: NodeId,
        node: &JoinNode,
        poly: &PolymorphicRoot,
        row: &Row,
        cache: &mut IdentityCache,
    ) -> Result<Option<(EntityRef, EntityKey)>> {
        let reader = self.aliases.reader(row, id);
        let Some(identifier) = poly.identifier(&reader)? else {
            return Ok(None);
        };
        if identifier.is_null() {
            return Ok(None);
        }

        let key = EntityKey::new(id, identifier);
        if let Some(existing) = cache.get(&key) {
            let existing = existing.clone();
            // The resolved variant is remembered, so the discriminator is
            // not re-read for rows of an already-known identifier.
            if let Some(variant) = cache.variant(&key).and_then(|i| poly.variant(i)) {
                variant.new_or_merge(&reader, Some(&existing))?;
            }
            return Ok(Some((existing, key)));
        }

        let discriminator = reader.get_bare(&poly.discriminator).ok_or_else(|| {
            Error::inflate(
                node.name(),
                format!("discriminator column '{}' missing from row", poly.discriminator),
            )
        })?;
        if discriminator.is_null() {
            return Ok(None);
        }
        let (index, variant) = poly.variant_for(discriminator).ok_or_else(|| {
            Error::inflate(
                node.name(),
                format!("no subtype mapped for discriminator value {discriminator}"),
            )
        })?;

        let entity = variant.new_or_merge(&reader, None)?;
        cache.insert(key.clone(), entity.clone());
        cache.set_variant(&key, index);
        Ok(Some((entity, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_core::binding::{EntityBinding, RelationFixer};
    use entgraph_core::{
        AnsiDialect, Value, new_entity, same_entity, typed, with_entity, with_entity_mut,
    };
    use entgraph_query::{JoinKey, JoinTree, PolymorphicVariant, QueryCompiler, Relation};
    use std::sync::Arc;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Country {
        id: i64,
        name: String,
        capital: Option<Arc<RwLock<City>>>,
        cities: Vec<Arc<RwLock<City>>>,
    }

    #[derive(Debug)]
    struct City {
        id: i64,
        name: String,
    }

    fn country_binding() -> EntityBinding {
        EntityBinding::keyed::<Country, _>("Country", "id", |r| {
            Ok(Country {
                id: r.get("id")?,
                name: r.get("name")?,
                capital: None,
                cities: Vec::new(),
            })
        })
    }

    fn city_binding() -> EntityBinding {
        EntityBinding::keyed::<City, _>("City", "id", |r| {
            Ok(City {
                id: r.get("id")?,
                name: r.get("name")?,
            })
        })
    }

    fn capital_fixer() -> RelationFixer {
        RelationFixer::to_one(|parent, child| {
            let city = typed::<City>(child).expect("child is a City");
            with_entity_mut::<Country, _>(parent, |c| c.capital = Some(city))
        })
    }

    fn cities_fixer() -> RelationFixer {
        RelationFixer::to_many(|parent, child| {
            let city = typed::<City>(child).expect("child is a City");
            with_entity_mut::<Country, _>(parent, |c| c.cities.push(city))
        })
    }

    fn row(names: &[&str], values: Vec<Value>) -> Row {
        Row::new(names.iter().map(|n| (*n).to_string()).collect(), values)
    }

    #[test]
    fn to_one_relation_inflates_and_short_circuits() {
        let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
        tree.add_relation(
            "Country",
            Relation::entity(
                "capital",
                "City",
                JoinKey::left_outer("capital_id", "id"),
                city_binding(),
                capital_fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = ["Country_id", "Country_name", "capital_id", "capital_name"];
        let rows = vec![
            row(
                &columns,
                vec![
                    Value::Int(1),
                    Value::Text("France".into()),
                    Value::Int(7),
                    Value::Text("Paris".into()),
                ],
            ),
            row(
                &columns,
                vec![
                    Value::Int(2),
                    Value::Text("Atlantis".into()),
                    Value::Null,
                    Value::Null,
                ],
            ),
        ];

        let roots = inflater.inflate_all(&rows).unwrap();
        assert_eq!(roots.len(), 2);

        with_entity::<Country, _>(&roots[0], |c| {
            assert_eq!(c.name, "France");
            let capital = c.capital.as_ref().expect("capital wired");
            assert_eq!(capital.read().unwrap().name, "Paris");
        })
        .unwrap();
        with_entity::<Country, _>(&roots[1], |c| {
            assert_eq!(c.name, "Atlantis");
            assert!(c.capital.is_none());
        })
        .unwrap();
    }

    #[test]
    fn fan_out_collapses_to_one_parent() {
        let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
        tree.add_relation(
            "Country",
            Relation::entity(
                "cities",
                "City",
                JoinKey::left_outer("id", "country_id"),
                city_binding(),
                cities_fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = ["Country_id", "Country_name", "cities_id", "cities_name"];
        let mut rows = vec![
            row(&columns, vec![Value::Int(1), Value::Text("France".into()), Value::Int(7), Value::Text("Paris".into())]),
            row(&columns, vec![Value::Int(1), Value::Text("France".into()), Value::Int(8), Value::Text("Lyon".into())]),
            row(&columns, vec![Value::Int(1), Value::Text("France".into()), Value::Int(9), Value::Text("Nice".into())]),
        ];

        let roots = inflater.inflate_all(&rows).unwrap();
        assert_eq!(roots.len(), 1);
        let forward: Vec<i64> = with_entity::<Country, _>(&roots[0], |c| {
            c.cities.iter().map(|city| city.read().unwrap().id).collect()
        })
        .unwrap();
        assert_eq!(forward.len(), 3);

        // Row arrival order must not affect the final element set.
        rows.reverse();
        let roots = inflater.inflate_all(&rows).unwrap();
        assert_eq!(roots.len(), 1);
        let reversed: Vec<i64> = with_entity::<Country, _>(&roots[0], |c| {
            c.cities.iter().map(|city| city.read().unwrap().id).collect()
        })
        .unwrap();
        let mut a = forward.clone();
        let mut b = reversed.clone();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_rows_wire_each_child_once() {
        let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
        tree.add_relation(
            "Country",
            Relation::entity(
                "cities",
                "City",
                JoinKey::left_outer("id", "country_id"),
                city_binding(),
                cities_fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = ["Country_id", "Country_name", "cities_id", "cities_name"];
        let repeated = row(
            &columns,
            vec![Value::Int(1), Value::Text("France".into()), Value::Int(7), Value::Text("Paris".into())],
        );
        let rows = vec![repeated.clone(), repeated.clone(), repeated];

        let roots = inflater.inflate_all(&rows).unwrap();
        with_entity::<Country, _>(&roots[0], |c| assert_eq!(c.cities.len(), 1)).unwrap();
    }

    #[test]
    fn null_short_circuit_skips_descendant_extraction() {
        #[derive(Debug)]
        struct Person;

        let capital_builds = Arc::new(AtomicUsize::new(0));
        let mayor_identifier_reads = Arc::new(AtomicUsize::new(0));

        let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
        let builds = Arc::clone(&capital_builds);
        tree.add_relation(
            "Country",
            Relation::entity(
                "capital",
                "City",
                JoinKey::left_outer("capital_id", "id"),
                EntityBinding::keyed::<City, _>("City", "id", move |r| {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(City { id: r.get("id")?, name: r.get("name")? })
                }),
                capital_fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        let reads = Arc::clone(&mayor_identifier_reads);
        tree.add_relation(
            "capital",
            Relation::entity(
                "mayor",
                "Person",
                JoinKey::left_outer("mayor_id", "id"),
                EntityBinding::new(
                    "Person",
                    move |r| {
                        reads.fetch_add(1, Ordering::SeqCst);
                        Ok(r.get_value("id").filter(|v| !v.is_null()).cloned())
                    },
                    |_r, _e| Ok(new_entity(Person)),
                ),
                RelationFixer::to_one(|_p, _c| Ok(())),
            )
            .columns(&["id"]),
        )
        .unwrap();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = [
            "Country_id",
            "Country_name",
            "capital_id",
            "capital_name",
            "capital_mayor_id",
        ];
        let absent = row(
            &columns,
            vec![Value::Int(2), Value::Text("Atlantis".into()), Value::Null, Value::Null, Value::Null],
        );

        let roots = inflater.inflate_all(&[absent]).unwrap();
        assert_eq!(roots.len(), 1);
        // The capital's constructor never ran, and neither did the mayor's
        // identifier extraction.
        assert_eq!(capital_builds.load(Ordering::SeqCst), 0);
        assert_eq!(mayor_identifier_reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn link_node_forwards_to_nearest_entity_ancestor() {
        // Country -> (link) country_city -> City, accumulated on Country.
        let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
        tree.add_relation(
            "Country",
            Relation::join("via", "country_city", JoinKey::inner("id", "country_id")),
        )
        .unwrap();
        tree.add_relation(
            "via",
            Relation::entity(
                "cities",
                "City",
                JoinKey::inner("city_id", "id"),
                city_binding(),
                cities_fixer(),
            )
            .columns(&["id", "name"]),
        )
        .unwrap();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = ["Country_id", "Country_name", "via_cities_id", "via_cities_name"];
        let rows = vec![
            row(&columns, vec![Value::Int(1), Value::Text("France".into()), Value::Int(7), Value::Text("Paris".into())]),
            row(&columns, vec![Value::Int(1), Value::Text("France".into()), Value::Int(8), Value::Text("Lyon".into())]),
        ];

        let roots = inflater.inflate_all(&rows).unwrap();
        assert_eq!(roots.len(), 1);
        with_entity::<Country, _>(&roots[0], |c| assert_eq!(c.cities.len(), 2)).unwrap();
    }

    #[derive(Debug)]
    struct Car {
        id: i64,
        wheels: i64,
    }

    #[derive(Debug)]
    struct Boat {
        id: i64,
        draft: f64,
    }

    fn vehicle_tree() -> JoinTree {
        JoinTree::with_polymorphic_root(
            "Vehicle",
            "SELECT id, kind, wheels, NULL AS draft FROM Car \
             UNION ALL SELECT id, kind, NULL AS wheels, draft FROM Boat",
            "kind",
            &["id", "wheels", "draft"],
            |r| Ok(r.get_value("id").filter(|v| !v.is_null()).cloned()),
            vec![
                PolymorphicVariant::new("Car", Value::Text("car".into()), |r, existing| {
                    match existing {
                        Some(e) => Ok(e.clone()),
                        None => Ok(new_entity(Car { id: r.get("id")?, wheels: r.get("wheels")? })),
                    }
                }),
                PolymorphicVariant::new("Boat", Value::Text("boat".into()), |r, existing| {
                    match existing {
                        Some(e) => Ok(e.clone()),
                        None => Ok(new_entity(Boat { id: r.get("id")?, draft: r.get("draft")? })),
                    }
                }),
            ],
        )
        .unwrap()
    }

    #[test]
    fn discriminator_selects_the_subtype() {
        let tree = vehicle_tree();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let columns = ["Vehicle_id", "Vehicle_wheels", "Vehicle_draft", "kind"];
        let rows = vec![
            row(&columns, vec![Value::Int(1), Value::Int(4), Value::Null, Value::Text("car".into())]),
            row(&columns, vec![Value::Int(2), Value::Null, Value::Float(1.5), Value::Text("boat".into())]),
        ];

        let roots = inflater.inflate_all(&rows).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(typed::<Car>(&roots[0]).is_some());
        assert!(typed::<Boat>(&roots[1]).is_some());
        with_entity::<Boat, _>(&roots[1], |b| assert!((b.draft - 1.5).abs() < f64::EPSILON)).unwrap();
    }

    #[test]
    fn known_identifier_does_not_reread_the_discriminator() {
        let tree = vehicle_tree();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);
        let mut cache = IdentityCache::new();

        let with_kind = row(
            &["Vehicle_id", "Vehicle_wheels", "Vehicle_draft", "kind"],
            vec![Value::Int(1), Value::Int(4), Value::Null, Value::Text("car".into())],
        );
        let first = inflater.inflate(&with_kind, &mut cache).unwrap().unwrap();

        // The second row for the same identifier omits the discriminator
        // column entirely: resolving it again would fail.
        let without_kind = row(
            &["Vehicle_id", "Vehicle_wheels", "Vehicle_draft"],
            vec![Value::Int(1), Value::Int(4), Value::Null],
        );
        let second = inflater.inflate(&without_kind, &mut cache).unwrap().unwrap();
        assert!(same_entity(&first, &second));
    }

    #[test]
    fn unknown_discriminator_is_an_inflation_error() {
        let tree = vehicle_tree();
        let compiled = QueryCompiler::new(&AnsiDialect).compile(&tree).unwrap();
        let inflater = Inflater::for_compiled(&tree, &compiled);

        let bad = row(
            &["Vehicle_id", "Vehicle_wheels", "Vehicle_draft", "kind"],
            vec![Value::Int(1), Value::Null, Value::Null, Value::Text("zeppelin".into())],
        );
        let err = inflater.inflate_all(&[bad]).unwrap_err();
        assert!(matches!(err, Error::Inflate(_)));
    }
}
