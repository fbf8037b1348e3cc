use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ntest::timeout;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

use common::testing::{LeakCheck, init_test_logging};
use common::{Configuration, StoreKind};
use store::chunkenc::{self, MAX_SAMPLES_PER_CHUNK};
use store::storepb::{
    InfoRequest, LabelMatcher, LabelNamesRequest, PartialResponseStrategy, SeriesRequest,
    StoreType, label_matcher, labels_from_proto,
};
use store::tsdb::mem::MemTsdb;
use store::{Labels, Store, TsdbStore};

fn configured_store(db: Arc<MemTsdb>) -> TsdbStore {
    let mut config = Configuration::default();
    config.store.store_type = StoreKind::Rule;
    config
        .store
        .external_labels
        .insert("region".to_string(), "eu-west".to_string());
    TsdbStore::from_config(db, &config.store)
}

fn series_request(matchers: Vec<LabelMatcher>) -> SeriesRequest {
    SeriesRequest {
        min_time: 0,
        max_time: i64::MAX,
        matchers,
        max_resolution_window: 0,
        partial_response_strategy: PartialResponseStrategy::Warn as i32,
    }
}

#[tokio::test]
async fn test_configured_store_info() {
    init_test_logging();
    let store = configured_store(Arc::new(MemTsdb::new()));

    let info = store
        .info(Request::new(InfoRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        labels_from_proto(&info.labels),
        Labels::from_pairs(&[("region", "eu-west")])
    );
    assert_eq!(info.store_type, StoreType::Rule as i32);
    assert_eq!((info.min_time, info.max_time), (0, i64::MAX));

    let names = store
        .label_names(Request::new(LabelNamesRequest {
            partial_response_strategy: PartialResponseStrategy::Warn as i32,
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(names.names.is_empty());
    assert!(names.warnings.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(60000)]
async fn test_series_chunked_over_many_series() {
    init_test_logging();
    let db = Arc::new(MemTsdb::new());
    let store = configured_store(db.clone());

    // One series above the chunk limit, several small ones.
    let big = Labels::from_pairs(&[("__name__", "up"), ("instance", "big")]);
    for t in 0..(MAX_SAMPLES_PER_CHUNK as i64 + 10) {
        db.add(big.clone(), t * 1000, 1.0).unwrap();
    }
    for i in 0..5 {
        let instance = format!("small-{i}");
        let labels = Labels::from_pairs(&[("__name__", "up"), ("instance", instance.as_str())]);
        db.add(labels, 0, f64::from(i)).unwrap();
    }

    let matcher = LabelMatcher {
        r#type: label_matcher::Type::Eq as i32,
        name: "__name__".to_string(),
        value: "up".to_string(),
    };
    let mut stream = store
        .series(Request::new(series_request(vec![matcher])))
        .await
        .unwrap()
        .into_inner();

    let mut seen = Vec::new();
    while let Some(response) = stream.next().await {
        let response = response.unwrap();
        let series = response.as_series().expect("no warnings expected");
        let labels = labels_from_proto(&series.labels);
        assert_eq!(labels.get("region"), "eu-west");

        let samples: usize = series
            .chunks
            .iter()
            .filter_map(|c| c.raw.as_ref())
            .map(|raw| chunkenc::decode(&raw.data).unwrap().len())
            .sum();
        let big = labels.get("instance") == "big";
        let expected_chunks = if big { 2 } else { 1 };
        assert_eq!(series.chunks.len(), expected_chunks, "{labels}");
        assert!(samples > 0);
        seen.push(labels.get("instance").to_string());
    }

    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    assert_eq!(seen.len(), 6);
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(20000)]
async fn test_cancelled_series_leaves_nothing_behind() {
    init_test_logging();
    let mut leaks = LeakCheck::start();

    let db = Arc::new(MemTsdb::new());
    leaks.track("tsdb", &db);
    for i in 0..100 {
        let name = format!("s{i:03}");
        for t in 0..100 {
            db.add(Labels::from_pairs(&[("name", name.as_str())]), t, 0.0)
                .unwrap();
        }
    }
    let store = configured_store(db.clone());

    let token = CancellationToken::new();
    let mut streams = Vec::new();
    for _ in 0..4 {
        let mut request = Request::new(series_request(vec![]));
        request.extensions_mut().insert(token.clone());
        streams.push(store.series(request).await.unwrap().into_inner());
    }
    for stream in &mut streams {
        assert!(stream.next().await.unwrap().is_ok());
    }

    token.cancel();
    for mut stream in streams {
        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item);
        }
        let status = last.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }

    while db.open_iterators() > 0 || db.open_queriers() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    drop(store);
    drop(db);
    leaks.check_timeout(Duration::from_secs(10)).await.unwrap();
}
