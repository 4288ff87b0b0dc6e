//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{json, Value};

use harbor_core::{Expr, Filter, Identity, Record, SqlValue};
use harbor_sync::MergeReport;

/// Generate an identity as a server would send it: a number or a
/// numeric string.
pub fn wire_identity() -> impl Strategy<Value = Value> {
    (1i64..=50).prop_flat_map(|id| prop_oneof![Just(json!(id)), Just(json!(id.to_string()))])
}

/// Generate a set of locally known wine identities.
pub fn local_ids() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(1i64..=50, 0..20)
}

/// Generate a wine name.
pub fn wine_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,12}( [A-Z][a-z]{2,10})?".prop_map(String::from)
}

/// Generate a scalar column value.
pub fn sql_value() -> impl Strategy<Value = SqlValue> {
    prop_oneof![
        Just(SqlValue::Null),
        any::<i64>().prop_map(SqlValue::Integer),
        "[a-z' ;-]{0,12}".prop_map(SqlValue::Text),
    ]
}

/// One record of a fetched wine batch.
#[derive(Debug, Clone)]
pub struct IncomingWine {
    pub id: Value,
    pub name: String,
    pub tombstone: bool,
}

impl IncomingWine {
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_json(&self.id)
    }

    pub fn to_record(&self) -> Record {
        let value = if self.tombstone {
            json!({"id": self.id, "is_deleted": true})
        } else {
            json!({"id": self.id, "name": self.name, "year": 2001, "country": "Italy"})
        };
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}

impl Arbitrary for IncomingWine {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (wire_identity(), wine_name(), prop::bool::weighted(0.25))
            .prop_map(|(id, name, tombstone)| IncomingWine {
                id,
                name,
                tombstone,
            })
            .boxed()
    }
}

/// Generate a fetched batch.
pub fn incoming_batch() -> impl Strategy<Value = Vec<IncomingWine>> {
    prop::collection::vec(any::<IncomingWine>(), 0..30)
}

/// The classification a merge of `batch` into `local` should report.
///
/// Records are classified in order against a running identity set, so a
/// second occurrence of a fresh identity is an update.
pub fn expected_merge(local: &BTreeSet<i64>, batch: &[IncomingWine]) -> (MergeReport, BTreeSet<i64>) {
    let mut known = local.clone();
    let mut report = MergeReport::default();
    for wine in batch {
        let id = match wine.identity() {
            Some(Identity::Integer(id)) => id,
            _ => continue,
        };
        if wine.tombstone {
            if known.remove(&id) {
                report.deleted += 1;
            }
        } else if known.contains(&id) {
            report.updated += 1;
        } else {
            known.insert(id);
            report.inserted += 1;
        }
    }
    (report, known)
}

/// Generate a filter over the fixture wine table.
pub fn wine_filter() -> impl Strategy<Value = Filter> {
    let column = prop_oneof![Just("name"), Just("year"), Just("country")];
    (
        prop::collection::vec((column.clone(), sql_value()), 0..3),
        prop::option::of((column.clone(), prop::collection::vec(sql_value(), 0..4))),
        prop::option::of((column, "[a-z%_]{0,6}")),
        prop::option::of(1u64..50),
        prop::option::of(0u64..50),
    )
        .prop_map(|(eqs, one_of, like, limit, offset)| {
            let mut filter = Filter::new();
            for (column, value) in eqs {
                filter = filter.where_eq(column, value);
            }
            if let Some((column, values)) = one_of {
                filter = filter.where_expr(Expr::one_of(column, values));
            }
            if let Some((column, needle)) = like {
                filter = filter.like(column, needle);
            }
            if let Some(limit) = limit {
                filter = filter.limit(limit);
            }
            if let Some(offset) = offset {
                filter = filter.offset(offset);
            }
            filter
        })
}
