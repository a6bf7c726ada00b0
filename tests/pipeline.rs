//! End-to-end search pipeline over in-process fakes.

mod common;

use serde_json::json;
use std::time::{Duration, Instant};

use common::{harness, harness_with_timeout, washington, FakeCatalog, FakeGeocoder, FakeLlm};
use stac_search::filter::FilterNode;
use stac_search::models::Query;
use stac_search::prompts;
use stac_search::Error;

const NAIP_QUERY: &str = "NAIP imagery over Washington state in 2022";

fn naip_llm() -> FakeLlm {
    FakeLlm::default()
        .specific(NAIP_QUERY, "NAIP aerial imagery")
        .relevant(&["naip"])
        .location(NAIP_QUERY, "Washington state")
        .datetime(NAIP_QUERY, "2022-01-01/2022-12-31")
}

#[tokio::test]
async fn test_naip_washington_end_to_end() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
    );

    let result = h.orchestrator.search(&Query::new(NAIP_QUERY)).await.unwrap();

    assert_eq!(result.search_params.collections, vec!["naip"]);
    assert_eq!(
        result.search_params.datetime.as_deref(),
        Some("2022-01-01/2022-12-31")
    );
    assert_eq!(result.search_params.intersects, Some(washington()));
    assert_eq!(result.search_params.max_items, 20);
    assert!(result.search_params.filter.is_none());
    assert_eq!(result.aoi, Some(washington()));
    assert_eq!(result.items.as_ref().map(|i| i.len()), Some(3));
    assert!(result
        .explanation
        .starts_with("Considering the following collections:\n- naip: "));

    assert_eq!(h.catalog.search_count(), 1);
    let sent = h.catalog.last_params().unwrap();
    assert_eq!(sent, result.search_params);
}

#[tokio::test]
async fn test_unresolved_location_skips_catalog_search() {
    let query = "sentinel-2 imagery of Atlantis";
    let llm = FakeLlm::default()
        .specific(query, "sentinel-2 imagery")
        .relevant(&["sentinel-2-l2a"])
        .location(query, "Atlantis");
    let h = harness(llm, FakeCatalog::planetary(), FakeGeocoder::default());

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert!(result.items.is_none());
    assert!(result.aoi.is_none());
    assert!(result.search_params.intersects.is_none());
    assert_eq!(result.search_params.collections, vec!["sentinel-2-l2a"]);
    assert!(result.explanation.ends_with("No polygon found for Atlantis."));
    assert_eq!(h.geocoder.call_count(), 1);
    assert_eq!(h.catalog.search_count(), 0);
}

#[tokio::test]
async fn test_missing_location_skips_geocoding() {
    let query = "cloudless imagery from last week";
    let h = harness(
        FakeLlm::default(),
        FakeCatalog::planetary(),
        FakeGeocoder::default(),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert!(result.items.is_none());
    assert!(result.explanation.contains("No polygon found"));
    assert_eq!(h.geocoder.call_count(), 0);
    assert_eq!(h.catalog.search_count(), 0);
}

#[tokio::test]
async fn test_general_query_uses_default_collections_present() {
    let query = "imagery of Seattle";
    let catalog = FakeCatalog::new(&[
        ("landsat-8-c2-l2", "Landsat 8", "Surface reflectance"),
        ("naip", "NAIP", "Aerial imagery"),
    ]);
    let llm = FakeLlm::default().location(query, "Seattle");
    let h = harness(
        llm,
        catalog,
        FakeGeocoder::default().with_place("Seattle", washington()),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert_eq!(result.search_params.collections, vec!["landsat-8-c2-l2"]);
    assert_eq!(
        result.explanation,
        "Including the following common collections in the search: landsat-8-c2-l2"
    );
    assert_eq!(h.catalog.search_count(), 1);
}

#[tokio::test]
async fn test_general_query_without_defaults_searches_everything() {
    let query = "imagery of Seattle";
    let catalog = FakeCatalog::new(&[
        ("naip", "NAIP", "Aerial imagery"),
        ("cop-dem-glo-30", "Copernicus DEM", "Elevation"),
    ]);
    let llm = FakeLlm::default().location(query, "Seattle");
    let h = harness(
        llm,
        catalog,
        FakeGeocoder::default().with_place("Seattle", washington()),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert_eq!(
        result.search_params.collections,
        vec!["naip", "cop-dem-glo-30"]
    );
    assert_eq!(result.explanation, "Searching all collections in the catalog.");
}

#[tokio::test]
async fn test_specific_query_with_no_relevant_collections_falls_back() {
    let query = "hyperspectral imagery of Seattle";
    let llm = FakeLlm::default()
        .specific(query, "hyperspectral imagery")
        .location(query, "Seattle");
    let h = harness(
        llm,
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Seattle", washington()),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert_eq!(
        result.search_params.collections,
        vec!["landsat-8-c2-l2", "sentinel-2-l2a"]
    );
    assert!(result
        .explanation
        .starts_with("Including the following common collections in the search:"));
}

#[tokio::test]
async fn test_params_only_does_not_search() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
    );

    let result = h
        .orchestrator
        .search(&Query::new(NAIP_QUERY).params_only())
        .await
        .unwrap();

    assert!(result.items.is_none());
    assert_eq!(result.aoi, Some(washington()));
    assert_eq!(result.search_params.intersects, Some(washington()));
    assert_eq!(h.catalog.search_count(), 0);
}

#[tokio::test]
async fn test_limit_overrides_max_items() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
    );

    let result = h
        .orchestrator
        .search(&Query::new(NAIP_QUERY).with_limit(2))
        .await
        .unwrap();

    assert_eq!(result.search_params.max_items, 2);
    assert_eq!(result.items.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cloud_cover_filter_is_passed_through() {
    let query = "cloudless imagery of Seattle";
    let cql2 = json!({"op": "lte", "args": [{"property": "eo:cloud_cover"}, 10]});
    let llm = FakeLlm::default()
        .location(query, "Seattle")
        .filter(query, cql2.clone());
    let h = harness(
        llm,
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Seattle", washington()),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    let filter: &FilterNode = result.search_params.filter.as_ref().unwrap();
    assert_eq!(filter.to_cql2(), cql2);
    assert_eq!(h.catalog.last_params().unwrap().filter, Some(filter.clone()));
}

#[tokio::test]
async fn test_unsupported_filter_is_dropped() {
    let query = "landsat imagery of Seattle from platform landsat-9";
    let llm = FakeLlm::default()
        .location(query, "Seattle")
        .filter(
            query,
            json!({"op": "eq", "args": [{"property": "platform"}, "landsat-9"]}),
        );
    let h = harness(
        llm,
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Seattle", washington()),
    );

    let result = h.orchestrator.search(&Query::new(query)).await.unwrap();

    assert!(result.search_params.filter.is_none());
    assert_eq!(h.catalog.search_count(), 1);
}

#[tokio::test]
async fn test_repeated_search_reuses_cached_calls() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
    );

    let first = h.orchestrator.search(&Query::new(NAIP_QUERY)).await.unwrap();
    let llm_calls = h.llm.call_count();
    let second = h.orchestrator.search(&Query::new(NAIP_QUERY)).await.unwrap();

    assert_eq!(first.search_params, second.search_params);
    assert_eq!(h.llm.call_count(), llm_calls);
    assert_eq!(h.geocoder.call_count(), 1);
    assert_eq!(h.catalog.search_count(), 2);
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let h = harness(
        FakeLlm::default(),
        FakeCatalog::planetary(),
        FakeGeocoder::default(),
    );

    let err = h.orchestrator.search(&Query::new("   ")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_collection_search_indexes_and_reranks() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default(),
    );

    let results = h
        .orchestrator
        .search_collections("NAIP aerial imagery", None)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].collection_id, "naip");
    assert_eq!(results[0].explanation, "naip matches the request");

    let indexed = h.orchestrator.catalog_index().list_indexed().await.unwrap();
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].collections, 4);
}

#[tokio::test]
async fn test_stalled_framing_times_out() {
    let h = harness_with_timeout(
        naip_llm().stall_on(prompts::FRAMING),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
        Duration::from_millis(200),
    );

    let started = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.orchestrator.search(&Query::new(NAIP_QUERY)),
    )
    .await
    .expect("search must not hang on a stalled model")
    .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
    assert!(err.to_string().contains("query framing"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.catalog.search_count(), 0);
}

#[tokio::test]
async fn test_stalled_rerank_times_out_in_collection_search() {
    let h = harness_with_timeout(
        naip_llm().stall_on(prompts::RERANK),
        FakeCatalog::planetary(),
        FakeGeocoder::default(),
        Duration::from_millis(200),
    );

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.orchestrator.search_collections("NAIP aerial imagery", None),
    )
    .await
    .expect("collection search must not hang on a stalled model")
    .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_geocoder_failure_propagates_and_is_not_cached() {
    let h = harness(
        naip_llm(),
        FakeCatalog::planetary(),
        FakeGeocoder::default()
            .with_place("Washington state", washington())
            .down(),
    );

    let err = h
        .orchestrator
        .search(&Query::new(NAIP_QUERY))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExternalService { .. }), "got {:?}", err);
    assert!(err.to_string().contains("geocoding"));
    assert_eq!(h.catalog.search_count(), 0);

    h.geocoder.recover();
    let result = h.orchestrator.search(&Query::new(NAIP_QUERY)).await.unwrap();
    assert_eq!(result.aoi, Some(washington()));
    assert_eq!(h.geocoder.call_count(), 2);
    assert_eq!(h.catalog.search_count(), 1);
}

#[tokio::test]
async fn test_location_extraction_failure_propagates_and_is_not_cached() {
    let h = harness(
        naip_llm().fail_on(prompts::LOCATION),
        FakeCatalog::planetary(),
        FakeGeocoder::default().with_place("Washington state", washington()),
    );

    let err = h
        .orchestrator
        .search(&Query::new(NAIP_QUERY))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExternalService { .. }), "got {:?}", err);
    assert_eq!(h.geocoder.call_count(), 0);
    assert_eq!(h.catalog.search_count(), 0);

    h.llm.recover();
    let result = h.orchestrator.search(&Query::new(NAIP_QUERY)).await.unwrap();
    assert_eq!(result.search_params.collections, vec!["naip"]);
    assert_eq!(result.items.map(|i| i.len()), Some(3));
    assert_eq!(h.catalog.search_count(), 1);
}
