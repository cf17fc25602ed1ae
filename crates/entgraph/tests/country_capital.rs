//! End-to-end aggregate fetch: compile, execute, inflate.

#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use asupersync::runtime::RuntimeBuilder;
use entgraph::prelude::*;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct Country {
    id: i64,
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

#[derive(Debug, Default)]
struct MockState {
    rows: Vec<Row>,
    queried_sql: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.queried_sql.push(sql);
            Outcome::Ok(guard.rows.clone())
        }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        async { Outcome::Ok(None) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async { Outcome::Ok(0) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        async { Outcome::Ok(0) }
    }

    fn batch(
        &self,
        _cx: &Cx,
        _statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send {
        async { Outcome::Ok(vec![]) }
    }
}

fn row(names: &[&str], values: Vec<Value>) -> Row {
    Row::new(names.iter().map(|n| (*n).to_string()).collect(), values)
}

fn capital_tree() -> JoinTree {
    let mut tree = JoinTree::with_root("Country", "Country", &["id"], country_binding());
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
    .expect("attach capital relation");
    tree
}

#[test]
fn one_to_one_aggregate_round_trip() {
    let query = AggregateQuery::new(capital_tree()).expect("compile");
    assert_eq!(
        query.sql(),
        "SELECT Country.id AS Country_id, capital.id AS capital_id, \
         capital.name AS capital_name \
         FROM Country LEFT OUTER JOIN City AS capital ON Country.capital_id = capital.id"
    );

    let columns = ["Country_id", "capital_id", "capital_name"];
    let state = Arc::new(Mutex::new(MockState {
        rows: vec![
            row(&columns, vec![Value::Int(1), Value::Int(7), Value::Text("Paris".into())]),
            row(&columns, vec![Value::Int(2), Value::Null, Value::Null]),
        ],
        queried_sql: Vec::new(),
    }));
    let conn = MockConnection { state: Arc::clone(&state) };

    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let roots = match query.fetch(&cx, &conn, &[]).await {
            Outcome::Ok(roots) => roots,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        };
        assert_eq!(roots.len(), 2);

        with_entity::<Country, _>(&roots[0], |c| {
            assert_eq!(c.id, 1);
            let capital = c.capital.as_ref().expect("capital wired");
            assert_eq!(capital.read().unwrap().name, "Paris");
        })
        .unwrap();

        with_entity::<Country, _>(&roots[1], |c| {
            assert_eq!(c.id, 2);
            assert!(c.capital.is_none());
        })
        .unwrap();
    });

    let guard = state.lock().unwrap();
    assert_eq!(guard.queried_sql.len(), 1);
    assert_eq!(guard.queried_sql[0], query.sql());
}

#[test]
fn fan_out_fetch_collapses_repeated_parents() {
    let mut tree = JoinTree::with_root("Country", "Country", &["id"], country_binding());
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
    .expect("attach cities relation");
    let query = AggregateQuery::new(tree).expect("compile");

    let columns = ["Country_id", "cities_id", "cities_name"];
    let state = Arc::new(Mutex::new(MockState {
        rows: vec![
            row(&columns, vec![Value::Int(1), Value::Int(7), Value::Text("Paris".into())]),
            row(&columns, vec![Value::Int(1), Value::Int(8), Value::Text("Lyon".into())]),
            row(&columns, vec![Value::Int(2), Value::Null, Value::Null]),
        ],
        queried_sql: Vec::new(),
    }));
    let conn = MockConnection { state };

    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let roots = match query.fetch(&cx, &conn, &[]).await {
            Outcome::Ok(roots) => roots,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        };
        // Three rows, two distinct aggregates, in first-seen order.
        assert_eq!(roots.len(), 2);
        with_entity::<Country, _>(&roots[0], |c| {
            assert_eq!(c.id, 1);
            let names: Vec<String> =
                c.cities.iter().map(|city| city.read().unwrap().name.clone()).collect();
            assert_eq!(names, vec!["Paris".to_string(), "Lyon".to_string()]);
        })
        .unwrap();
        with_entity::<Country, _>(&roots[1], |c| assert!(c.cities.is_empty())).unwrap();
    });
}

#[test]
fn shared_cache_reuses_instances_across_executions() {
    let query = AggregateQuery::new(capital_tree()).expect("compile");
    let columns = ["Country_id", "capital_id", "capital_name"];
    let rows =
        vec![row(&columns, vec![Value::Int(1), Value::Int(7), Value::Text("Paris".into())])];

    let mut cache = IdentityCache::new();
    let first = query.inflate_into(&rows, &mut cache).expect("first pass");
    let second = query.inflate_into(&rows, &mut cache).expect("second pass");

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    // The second pass resolved into the same live instances.
    assert!(entgraph::same_entity(&first[0], &second[0]));
    assert_eq!(cache.len(), 2);
}
