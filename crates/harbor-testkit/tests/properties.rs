//! Property tests for the reconciliation engine and the query builder.

use std::collections::{BTreeSet, HashSet};

use harbor::core::query::select;
use harbor::store::{Store, StoreExt};
use harbor::sync::SyncOptions;
use harbor::Identity;
use harbor_testkit::fixtures::wine;
use harbor_testkit::generators::{expected_merge, incoming_batch, local_ids, wine_filter};
use harbor_testkit::{wine_record, TestFixture};
use proptest::prelude::*;
use serde_json::Value;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merge_matches_classification_model(local in local_ids(), batch in incoming_batch()) {
        let (expected, remaining) = expected_merge(&local, &batch);

        let (report, stored) = runtime().block_on(async {
            let fixture = TestFixture::new();
            let entity = fixture.register(wine()).await.unwrap();
            fixture
                .seed(&entity, local.iter().map(|id| wine_record(*id, "local")).collect())
                .await
                .unwrap();

            let records = batch.iter().map(|w| w.to_record()).collect();
            let report = fixture
                .registry
                .engine()
                .merge_batch(&entity, records, &SyncOptions::new())
                .await
                .unwrap();

            let stored: BTreeSet<i64> = fixture
                .store()
                .all(&entity)
                .await
                .unwrap()
                .iter()
                .filter_map(|r| r.get("id").and_then(Value::as_i64))
                .collect();
            (report, stored)
        });

        prop_assert_eq!(report, expected);
        prop_assert_eq!(stored, remaining);
    }

    #[test]
    fn local_identities_match_rows(local in local_ids()) {
        let identities = runtime().block_on(async {
            let fixture = TestFixture::new();
            let entity = fixture.register(wine()).await.unwrap();
            fixture
                .seed(&entity, local.iter().map(|id| wine_record(*id, "local")).collect())
                .await
                .unwrap();
            fixture.store().identities("wine", "id").await.unwrap()
        });

        let expected: HashSet<Identity> = local.iter().map(|id| Identity::Integer(*id)).collect();
        prop_assert_eq!(identities, expected);
    }

    #[test]
    fn generated_filters_run_against_sqlite(filter in wine_filter()) {
        let query = select("wine", &filter).unwrap();
        prop_assert_eq!(query.sql.matches('?').count(), query.params.len());

        let rows = runtime().block_on(async {
            let fixture = TestFixture::new();
            let entity = fixture.register(wine()).await.unwrap();
            fixture
                .seed(&entity, (1..=5).map(|id| wine_record(id, "seeded")).collect())
                .await
                .unwrap();
            fixture.store().query("wine", &filter).await
        });
        prop_assert!(rows.is_ok());
        prop_assert!(rows.unwrap().len() <= 5);
    }
}
