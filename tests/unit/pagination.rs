//! Pagination over parsed search responses

use jira_extractor::fetcher::jira_http::parse_search_page;
use jira_extractor::fetcher::{Cursor, PageRequest, PaginationEngine, PaginationError, TransportError};
use jira_extractor::{QueryDescriptor, RecordType};
use serde_json::{json, Value};

fn issues(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({"key": format!("DEMO-{i}")})).collect()
}

#[test]
fn test_offset_pages_until_total() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue).with_page_size(100);
    let mut engine = PaginationEngine::new(&query);
    let mut pages = Vec::new();

    while let Some(request) = engine.next_request().unwrap() {
        let start = request.start_at();
        let count = (250 - start).min(100) as usize;
        let body = json!({"startAt": start, "maxResults": 100, "total": 250, "issues": issues(count)});
        let page = parse_search_page(body, &request).unwrap();
        engine.advance(&page).unwrap();
        pages.push((start, page.len()));
    }

    assert_eq!(pages, vec![(0, 100), (100, 100), (200, 50)]);
    assert_eq!(engine.pages_fetched(), 3);
    assert_eq!(engine.cursor(), None);
}

#[test]
fn test_short_page_without_total_is_terminal() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue).with_page_size(50);
    let request = PageRequest::new(&query, Some(Cursor::Offset(50)), 2);

    let full = parse_search_page(json!({"issues": issues(50)}), &request).unwrap();
    assert_eq!(full.next_cursor(), Some(&Cursor::Offset(100)));

    let short = parse_search_page(json!({"issues": issues(10)}), &request).unwrap();
    assert!(short.is_terminal());
}

#[test]
fn test_empty_result_set() {
    let query = QueryDescriptor::new("project = EMPTY", RecordType::Issue);
    let mut engine = PaginationEngine::new(&query);
    let request = engine.next_request().unwrap().unwrap();

    let page = parse_search_page(json!({"startAt": 0, "total": 0, "issues": []}), &request).unwrap();
    engine.advance(&page).unwrap();

    assert!(engine.is_finished());
    assert_eq!(engine.pages_fetched(), 1);
}

#[test]
fn test_token_pages_until_last() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let mut engine = PaginationEngine::new(&query);

    let first = engine.next_request().unwrap().unwrap();
    let page = parse_search_page(json!({"issues": issues(2), "nextPageToken": "t1"}), &first).unwrap();
    engine.advance(&page).unwrap();
    assert_eq!(engine.cursor(), Some(&Cursor::Token("t1".into())));

    let second = engine.next_request().unwrap().unwrap();
    assert_eq!(second.page_token(), Some("t1"));
    let page = parse_search_page(json!({"issues": issues(1), "isLast": true}), &second).unwrap();
    engine.advance(&page).unwrap();
    assert!(engine.is_finished());
}

#[test]
fn test_repeated_token_stalls() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let mut engine = PaginationEngine::new(&query);

    for expected_page in 1..=2 {
        let request = engine.next_request().unwrap().unwrap();
        let page = parse_search_page(json!({"issues": issues(1), "nextPageToken": "loop"}), &request).unwrap();
        let outcome = engine.advance(&page);
        if expected_page == 1 {
            outcome.unwrap();
        } else {
            assert_eq!(
                outcome,
                Err(PaginationError::Stall {
                    cursor: Cursor::Token("loop".into()),
                    page_number: 2
                })
            );
        }
    }
}

#[test]
fn test_iteration_ceiling() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue).with_page_size(1);
    let mut engine = PaginationEngine::new(&query).with_max_iterations(3);

    for _ in 0..3 {
        let request = engine.next_request().unwrap().unwrap();
        let body = json!({"startAt": request.start_at(), "total": 1000, "issues": issues(1)});
        engine.advance(&parse_search_page(body, &request).unwrap()).unwrap();
    }
    assert_eq!(engine.next_request().unwrap_err(), PaginationError::IterationLimit { limit: 3 });
}

#[test]
fn test_unexpected_shape_is_malformed() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let request = PageRequest::new(&query, None, 1);
    let err = parse_search_page(json!({"values": []}), &request).unwrap_err();
    assert!(matches!(err, TransportError::MalformedRequest { status: 200, .. }));
}
