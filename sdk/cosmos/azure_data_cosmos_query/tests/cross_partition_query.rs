// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

mod mock_backend;

use std::error::Error;

use azure_data_cosmos_query::{
    models::{DistinctType, QueryInfo},
    ContinuationToken, ErrorKind, QueryExecutor, QueryOptions, QueryPage, QueryServices,
};
use futures::TryStreamExt;
use mock_backend::{
    init_tracing, three_ranges, two_items_per_range, MockBackend, MockItem, RecordedTarget,
};

const COLLECTION: &str = "dbs/db/colls/container";
const QUERY: &str = "SELECT * FROM c";

async fn run(
    services: &QueryServices,
    options: QueryOptions,
) -> azure_data_cosmos_query::Result<Vec<QueryPage<MockItem>>> {
    QueryExecutor::<MockItem>::new(services.clone(), COLLECTION, QUERY, Some(options))
        .into_stream()
        .try_collect()
        .await
}

fn ids(pages: &[QueryPage<MockItem>]) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| page.items().iter().map(|item| item.id.clone()))
        .collect()
}

fn page_size(size: usize) -> QueryOptions {
    QueryOptions::builder().with_max_item_count(size).build()
}

#[tokio::test]
pub async fn unordered_pages_follow_range_order() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) =
        MockBackend::new(three_ranges(), two_items_per_range()).into_services();

    let pages = run(&services, page_size(2)).await?;

    assert_eq!(pages.len(), 3);
    assert_eq!(
        ids(&pages),
        vec!["0001", "0002", "0003", "0004", "0005", "0006"]
    );
    assert_eq!(
        pages[0].continuation(),
        Some(r#"[{"token":null,"range":{"min":"B","max":"M"}}]"#)
    );
    assert_eq!(
        pages[1].continuation(),
        Some(r#"[{"token":null,"range":{"min":"M","max":"FF"}}]"#)
    );
    assert_eq!(pages[2].continuation(), None);

    // The query is first sent to the container, which refuses it and returns the plan.
    let targets: Vec<_> = backend.requests().into_iter().map(|r| r.target).collect();
    assert_eq!(
        targets,
        vec![
            RecordedTarget::Collection,
            RecordedTarget::Range("0".into()),
            RecordedTarget::Range("1".into()),
            RecordedTarget::Range("2".into()),
        ]
    );
    assert!(pages.iter().all(|page| page.activity_id().is_some()));
    Ok(())
}

#[tokio::test]
pub async fn request_charges_are_conserved() -> Result<(), Box<dyn Error>> {
    init_tracing();
    // Only the last range holds items, so two empty pages are fetched first.
    let items = vec![MockItem::new(1, "N", 0), MockItem::new(2, "P", 1)];
    let (backend, services) = MockBackend::new(three_ranges(), items).into_services();

    let pages = run(&services, page_size(10)).await?;

    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].items().len(), 2);
    assert_eq!(pages[0].request_charge(), 5.0);
    let reported: f64 = pages.iter().map(|page| page.request_charge()).sum();
    assert_eq!(reported, backend.total_charge());
    Ok(())
}

#[tokio::test]
pub async fn empty_container_reports_its_charge() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) = MockBackend::new(three_ranges(), vec![]).into_services();

    let pages = run(&services, QueryOptions::default()).await?;

    assert_eq!(pages.len(), 1);
    assert!(pages[0].items().is_empty());
    assert_eq!(pages[0].continuation(), None);
    assert_eq!(pages[0].request_charge(), backend.total_charge());
    assert_eq!(backend.total_charge(), 3.0);
    Ok(())
}

#[tokio::test]
pub async fn every_continuation_resumes_the_remaining_items() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (_, services) = MockBackend::new(three_ranges(), two_items_per_range()).into_services();
    let all = run(&services, page_size(1)).await?;
    let expected = ids(&all);
    assert_eq!(expected.len(), 6);

    for (index, page) in all.iter().enumerate() {
        let Some(token) = page.continuation() else {
            continue;
        };
        assert!(ContinuationToken::parse(token).is_cross_partition());

        let (backend, services) =
            MockBackend::new(three_ranges(), two_items_per_range()).into_services();
        let resumed = run(
            &services,
            QueryOptions::builder()
                .with_max_item_count(1)
                .with_continuation(token)
                .build(),
        )
        .await?;
        assert_eq!(ids(&resumed), expected[index + 1..].to_vec(), "resuming after page {}", index);

        // A cross-partition token skips the single-partition attempt.
        assert_eq!(backend.plan_requests(), 1);
        assert!(backend
            .requests()
            .iter()
            .all(|r| r.target != RecordedTarget::Collection));
    }
    Ok(())
}

#[tokio::test]
pub async fn top_stops_requesting_once_satisfied() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) = MockBackend::new(three_ranges(), two_items_per_range())
        .with_plan(QueryInfo {
            top: Some(3),
            ..Default::default()
        })
        .into_services();

    let pages = run(&services, page_size(2)).await?;

    assert_eq!(ids(&pages), vec!["0001", "0002", "0003"]);
    // The second page is cut from two items to one.
    let sizes: Vec<usize> = pages.iter().map(|page| page.items().len()).collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(pages.last().and_then(|p| p.continuation()), None);
    assert!(!backend
        .requests()
        .iter()
        .any(|r| r.target == RecordedTarget::Range("2".into())));

    let token = pages[0].continuation().expect("first page should have a continuation");
    assert!(matches!(
        ContinuationToken::parse(token),
        ContinuationToken::Take(take) if take.remaining == 1
    ));
    Ok(())
}

#[tokio::test]
pub async fn top_resumes_with_remaining_count() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let plan = QueryInfo {
        limit: Some(3),
        ..Default::default()
    };
    let (_, services) = MockBackend::new(three_ranges(), two_items_per_range())
        .with_plan(plan.clone())
        .into_services();
    let first = run(&services, page_size(2)).await?;
    let token = first[0].continuation().expect("first page should have a continuation");

    let (_, services) = MockBackend::new(three_ranges(), two_items_per_range())
        .with_plan(plan)
        .into_services();
    let resumed = run(
        &services,
        QueryOptions::builder()
            .with_max_item_count(2)
            .with_continuation(token)
            .build(),
    )
    .await?;
    assert_eq!(ids(&resumed), vec!["0003"]);
    Ok(())
}

#[tokio::test]
pub async fn rewritten_query_is_sent_to_partitions() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) = MockBackend::new(three_ranges(), two_items_per_range())
        .with_plan(QueryInfo {
            rewritten_query: "SELECT * FROM c WHERE {documentdb-formattableorderbyquery-filter}"
                .into(),
            ..Default::default()
        })
        .into_services();

    run(&services, QueryOptions::default()).await?;

    for request in backend.requests() {
        match request.target {
            RecordedTarget::Collection => assert_eq!(request.query, QUERY),
            _ => assert_eq!(request.query, "SELECT * FROM c WHERE true"),
        }
    }
    Ok(())
}

#[tokio::test]
pub async fn partition_key_queries_use_native_continuations() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) =
        MockBackend::new(three_ranges(), two_items_per_range()).into_services();
    let options = QueryOptions::builder()
        .with_max_item_count(1)
        .with_partition_key("C")
        .build();

    let pages = run(&services, options.clone()).await?;
    assert_eq!(ids(&pages), vec!["0003", "0004"]);
    let token = pages[0].continuation().expect("first page should have a continuation");
    assert!(!ContinuationToken::parse(token).is_cross_partition());
    assert!(backend
        .requests()
        .iter()
        .all(|r| r.target == RecordedTarget::PartitionKey("C".into())));
    assert_eq!(backend.plan_requests(), 0);

    let resumed = run(
        &services,
        QueryOptions {
            continuation: Some(token.to_string()),
            ..options
        },
    )
    .await?;
    assert_eq!(ids(&resumed), vec!["0004"]);
    Ok(())
}

#[tokio::test]
pub async fn malformed_continuations_are_rejected() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let tokens = [
        // The backend rejects the inner token.
        r#"[{"token":"garbage","range":{"min":"","max":"B"}}]"#,
        // A TOP token for a query without TOP.
        r#"{"token":"[]","remaining":3}"#,
        // An ORDER BY token for an unordered query.
        r#"[{"token":null,"range":{"min":"","max":"FF"},"orderByItems":[{"item":1}],"rid":"r"}]"#,
        // An empty range, which no partition key range overlaps.
        r#"[{"token":null,"range":{"min":"B","max":"B"}}]"#,
        // Not a cross-partition token, for a query the gateway runs across partitions.
        "not-a-continuation",
    ];
    for token in tokens {
        let (_, services) =
            MockBackend::new(three_ranges(), two_items_per_range()).into_services();
        let err = run(
            &services,
            QueryOptions::builder().with_continuation(token).build(),
        )
        .await
        .expect_err("query should fail");
        assert_eq!(err.kind(), ErrorKind::MalformedContinuation, "token {}", token);
    }
    Ok(())
}

#[tokio::test]
pub async fn native_continuation_does_not_restart_cross_partition_query(
) -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) =
        MockBackend::new(three_ranges(), two_items_per_range()).into_services();
    let mut executor = QueryExecutor::<MockItem>::new(
        services,
        COLLECTION,
        QUERY,
        Some(
            QueryOptions::builder()
                .with_max_item_count(2)
                .with_continuation("opaque-native-token")
                .build(),
        ),
    );

    let err = executor
        .next_page()
        .await
        .expect_err("the query should not restart from the beginning");
    assert_eq!(err.kind(), ErrorKind::MalformedContinuation);
    assert!(executor.next_page().await?.is_none());

    // Only the single-partition attempt was sent; no partition was read.
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, RecordedTarget::Collection);
    assert_eq!(
        requests[0].continuation.as_deref(),
        Some("opaque-native-token")
    );
    Ok(())
}

#[tokio::test]
pub async fn cross_partition_queries_can_be_disabled() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (_, services) = MockBackend::new(three_ranges(), two_items_per_range()).into_services();
    let err = run(
        &services,
        QueryOptions::builder()
            .with_cross_partition_query(false)
            .build(),
    )
    .await
    .expect_err("query should fail");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    Ok(())
}

#[tokio::test]
pub async fn unsupported_plans_fail_before_fetching() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (backend, services) = MockBackend::new(three_ranges(), two_items_per_range())
        .with_plan(QueryInfo {
            distinct_type: DistinctType::Unordered,
            ..Default::default()
        })
        .into_services();
    let err = run(&services, QueryOptions::default())
        .await
        .expect_err("query should fail");
    assert_eq!(err.kind(), ErrorKind::UnsupportedQueryPlan);
    assert_eq!(backend.requests().len(), 1);
    Ok(())
}

#[tokio::test]
pub async fn executor_stops_after_an_error() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let (_, services) = MockBackend::new(three_ranges(), two_items_per_range()).into_services();
    let mut executor = QueryExecutor::<MockItem>::new(
        services,
        COLLECTION,
        QUERY,
        Some(QueryOptions::builder().with_max_item_count(0).build()),
    );
    let err = executor.next_page().await.expect_err("invalid options should fail");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(executor.next_page().await?.is_none());
    Ok(())
}
