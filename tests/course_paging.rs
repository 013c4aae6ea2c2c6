//! Integration tests for course listing: cursor paging, subtree filtering and
//! chunked "in" queries, run against both store adapters.

use std::collections::HashSet;
use std::sync::Arc;

use course_catalog::catalog::{
    CategoryRepository, CourseBrowser, CourseQueryEngine, CourseRecord, PagePosition, Phase,
    QueryOptions,
};
use course_catalog::store::{DocumentStore, Fields, MemoryStore, SqliteStore};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn course_fields(name: &str, category: Option<&str>, created_at: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), json!(name));
    fields.insert("description".into(), json!(""));
    fields.insert("category_id".into(), json!(category));
    fields.insert("created_at".into(), json!(created_at));
    fields
}

fn engine(store: Arc<dyn DocumentStore>, page_size: usize) -> CourseQueryEngine {
    CourseQueryEngine::new(
        store,
        QueryOptions {
            page_size,
            ..QueryOptions::default()
        },
    )
}

/// Walk the unfiltered listing until it reports no more pages.
async fn collect_all(engine: &CourseQueryEngine) -> Vec<CourseRecord> {
    let tree = Default::default();
    let mut out = Vec::new();
    let mut position = PagePosition::Start;
    loop {
        let page = engine.fetch_page(&tree, None, &position).await.unwrap();
        assert!(page.items.len() <= engine.page_size());
        out.extend(page.items);
        match page.next {
            Some(next) => position = next,
            None => return out,
        }
    }
}

fn assert_complete_and_ordered(courses: &[CourseRecord], expected: usize) {
    assert_eq!(courses.len(), expected);
    let ids: HashSet<&str> = courses.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids.len(), expected, "duplicate course across pages");
    for pair in courses.windows(2) {
        assert!(
            (pair[0].created_at, &pair[0].id) > (pair[1].created_at, &pair[1].id),
            "out of order: {} before {}",
            pair[0].id,
            pair[1].id
        );
    }
}

// ============================================================================
// Cursor Pagination
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_cursor_paging_is_complete(
        stamps in prop::collection::vec(0i64..6, 0..45),
        page_size in 1usize..8,
        sqlite in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let store: Arc<dyn DocumentStore> = if sqlite {
                Arc::new(SqliteStore::open(":memory:").await.unwrap())
            } else {
                Arc::new(MemoryStore::new())
            };
            for (i, stamp) in stamps.iter().enumerate() {
                store
                    .insert("courses", course_fields(&format!("c{i}"), None, *stamp))
                    .await
                    .unwrap();
            }

            let courses = collect_all(&engine(store, page_size)).await;
            assert_complete_and_ordered(&courses, stamps.len());
        });
    }
}

#[tokio::test]
async fn test_sqlite_and_memory_agree_on_order() {
    let memory = Arc::new(MemoryStore::new());
    let sqlite = Arc::new(SqliteStore::open(":memory:").await.unwrap());

    // Each store assigns its own ids, so only the created_at sequence is compared.
    for i in 0..12 {
        let id = memory
            .insert("courses", course_fields(&format!("c{i}"), None, i % 3))
            .await
            .unwrap();
        let doc = memory.get("courses", &id).await.unwrap().unwrap();
        sqlite.insert("courses", doc.data).await.unwrap();
    }

    let from_memory = collect_all(&engine(memory, 5)).await;
    let from_sqlite = collect_all(&engine(sqlite, 5)).await;

    let stamps = |v: &[CourseRecord]| v.iter().map(|c| c.created_at).collect::<Vec<_>>();
    assert_eq!(stamps(&from_memory), stamps(&from_sqlite));
    assert_complete_and_ordered(&from_sqlite, 12);
}

// ============================================================================
// Subtree Filtering
// ============================================================================

/// Categories A → B → D and A → C, one course per category.
async fn seed_scenario(store: Arc<dyn DocumentStore>) -> (CategoryRepository, [String; 4]) {
    let repo = CategoryRepository::new(store.clone(), "categories");
    let a = repo.add("A", None, None).await.unwrap();
    let b = repo.add("B", None, Some(&a)).await.unwrap();
    let c = repo.add("C", None, Some(&a)).await.unwrap();
    let d = repo.add("D", None, Some(&b)).await.unwrap();

    for (tag, stamp) in [(&b, 4), (&d, 3), (&c, 2), (&a, 1)] {
        store
            .insert("courses", course_fields(&format!("on-{tag}"), Some(tag.as_str()), stamp))
            .await
            .unwrap();
    }
    (repo, [a, b, c, d])
}

#[tokio::test]
async fn test_subtree_scenario_on_sqlite() {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    let (repo, [a, b, c, d]) = seed_scenario(store.clone()).await;
    let tree = repo.list().await.unwrap();
    let engine = engine(store, 20);

    let page = engine
        .fetch_page(&tree, Some(&a), &PagePosition::Start)
        .await
        .unwrap();
    let tags: Vec<_> = page
        .items
        .iter()
        .map(|c| c.category_id.clone().unwrap())
        .collect();
    assert_eq!(tags, vec![b.clone(), d.clone(), c.clone(), a.clone()]);

    let page = engine
        .fetch_page(&tree, Some(&b), &PagePosition::Start)
        .await
        .unwrap();
    let tags: Vec<_> = page
        .items
        .iter()
        .map(|c| c.category_id.clone().unwrap())
        .collect();
    assert_eq!(tags, vec![b, d]);
}

#[tokio::test]
async fn test_chunked_filter_on_sqlite_matches_single_query() {
    // A root with 24 children, queried with an in-limit of 5.
    let chunked = Arc::new(SqliteStore::open(":memory:").await.unwrap().with_in_limit(5));
    let repo = CategoryRepository::new(chunked.clone(), "categories");
    let root = repo.add("Root", None, None).await.unwrap();
    let mut children = Vec::new();
    for i in 0..24 {
        children.push(repo.add(&format!("Child {i:02}"), None, Some(&root)).await.unwrap());
    }
    for i in 0..60 {
        let tag = &children[i % children.len()];
        chunked
            .insert("courses", course_fields(&format!("k{i}"), Some(tag.as_str()), (i % 9) as i64))
            .await
            .unwrap();
    }
    chunked
        .insert("courses", course_fields("stray", Some("not-a-category"), 100))
        .await
        .unwrap();

    let tree = repo.list().await.unwrap();
    let engine = engine(chunked.clone(), 7);
    assert_eq!(engine.effective_chunk_size(), 5);

    let closed = tree.closed_set_of(&root).unwrap();
    let merged = engine.fetch_subtree_matches(&closed).await.unwrap();
    assert_eq!(merged.len(), 60);
    assert!(merged.iter().all(|c| c.name != "stray"));

    // Paging 1..k concatenated equals the full result sliced.
    let mut paged = Vec::new();
    let mut position = PagePosition::Start;
    loop {
        let page = engine.fetch_page(&tree, Some(&root), &position).await.unwrap();
        paged.extend(page.items);
        match page.next {
            Some(next) => position = next,
            None => break,
        }
    }
    assert_eq!(paged, merged);
}

// ============================================================================
// Browser
// ============================================================================

#[tokio::test]
async fn test_browser_over_sqlite() {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    let (repo, [_, b, _, _]) = seed_scenario(store.clone()).await;

    let mut browser = CourseBrowser::new(repo, engine(store, 1));
    browser.refresh_categories().await.unwrap();
    browser.select_category(Some(&b)).unwrap();

    browser.load_first().await;
    assert_eq!(browser.page().phase(), Phase::Loaded);
    assert!(browser.page().has_more());
    assert!(browser.load_more().await);
    assert!(!browser.load_more().await);

    let names: Vec<&str> = browser
        .page()
        .items()
        .iter()
        .map(|c| browser.tree().category_name(c.category_id.as_deref()))
        .collect();
    assert_eq!(names, vec!["B", "D"]);
}
