use async_trait::async_trait;
use music_dashboard_session as lib;
use lib::error::{ApiError, FetchError, NotAuthenticated};
use lib::fetch::{FetchCursor, PageSource, PaginatedFetchEngine};
use lib::models::Page;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Serves `total` numbered records; records what offsets were asked for.
struct Numbers {
    total: u32,
    tag: &'static str,
    latency: Option<Duration>,
    fail_at: Option<(u32, FetchError)>,
    // pages at or past this offset wait for the gate to open
    gate: Option<(u32, Arc<Notify>)>,
    requests: Mutex<Vec<u32>>,
}

impl Numbers {
    fn new(total: u32) -> Self {
        Self {
            total,
            tag: "n",
            latency: None,
            fail_at: None,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<u32> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for Numbers {
    type Item = String;

    fn label(&self) -> &str {
        self.tag
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<String>, FetchError> {
        self.requests.lock().unwrap().push(offset);
        if let Some((at, gate)) = &self.gate {
            if offset >= *at {
                gate.notified().await;
            }
        }
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        if let Some((at, err)) = &self.fail_at {
            if *at == offset {
                return Err(err.clone());
            }
        }
        let end = (offset + limit).min(self.total);
        Ok(Page::new(
            (offset.min(end)..end).map(|i| format!("{}{}", self.tag, i)).collect(),
        ))
    }
}

#[test]
fn cursor_stops_on_short_page() {
    let mut c = FetchCursor::new(50);
    c.advance(50);
    assert_eq!((c.offset, c.done), (50, false));
    c.advance(27);
    assert_eq!((c.offset, c.done), (50, true));
    assert_eq!(FetchCursor::new(0).batch_size, 1);
}

#[tokio::test]
async fn fetches_all_pages_in_order() {
    let engine = PaginatedFetchEngine::<String>::new();
    let source = Arc::new(Numbers::new(127));
    let generation = engine.start_run(source.clone(), 50);
    assert_eq!(generation, 1);

    let done = engine.finished().await;
    assert!(done.done);
    assert!(!done.running);
    assert_eq!(done.fetched, 127);
    assert_eq!(source.requests(), vec![0, 50, 100]);

    let items = engine.result();
    assert_eq!(items.len(), 127);
    assert_eq!(items.first().map(String::as_str), Some("n0"));
    assert_eq!(items.last().map(String::as_str), Some("n126"));
    let expected: Vec<String> = (0..127).map(|i| format!("n{}", i)).collect();
    assert_eq!(items, expected);
    assert!(engine.take_error().is_none());
}

#[tokio::test]
async fn empty_collection_completes_after_one_request() {
    let engine = PaginatedFetchEngine::<String>::new();
    let source = Arc::new(Numbers::new(0));
    engine.start_run(source.clone(), 50);

    let done = engine.finished().await;
    assert!(done.done);
    assert_eq!(engine.progress(), 0);
    assert_eq!(source.requests(), vec![0]);
}

#[tokio::test]
async fn exact_multiple_needs_a_trailing_empty_page() {
    let engine = PaginatedFetchEngine::<String>::new();
    let source = Arc::new(Numbers::new(100));
    engine.start_run(source.clone(), 50);

    engine.finished().await;
    assert_eq!(source.requests(), vec![0, 50, 100]);
    assert_eq!(engine.result().len(), 100);
    assert!(engine.cursor().done);
}

#[tokio::test]
async fn first_page_failure_is_reported_once() {
    let engine = PaginatedFetchEngine::<String>::new();
    let mut source = Numbers::new(127);
    source.fail_at = Some((0, FetchError::from(ApiError::Timeout)));
    engine.start_run(Arc::new(source), 50);

    let p = engine.finished().await;
    assert!(!p.done);
    assert!(!p.running);
    assert!(engine.result().is_empty());
    assert_eq!(
        engine.take_error(),
        Some(FetchError::Transient(ApiError::Timeout))
    );
    assert_eq!(engine.take_error(), None);
    assert_eq!(engine.snapshot().error, None);
}

#[tokio::test]
async fn mid_run_failure_keeps_records_already_fetched() {
    let engine = PaginatedFetchEngine::<String>::new();
    let mut source = Numbers::new(127);
    source.fail_at = Some((50, FetchError::NotAuthenticated(NotAuthenticated)));
    engine.start_run(Arc::new(source), 50);

    let p = engine.finished().await;
    assert!(!p.done);
    assert_eq!(p.fetched, 50);
    assert_eq!(engine.result().len(), 50);
    assert_eq!(
        engine.take_error(),
        Some(FetchError::NotAuthenticated(NotAuthenticated))
    );
}

#[tokio::test]
async fn partial_results_are_readable_mid_run() {
    let engine = PaginatedFetchEngine::<String>::new();
    let gate = Arc::new(Notify::new());
    let mut source = Numbers::new(127);
    source.gate = Some((50, gate.clone()));
    engine.start_run(Arc::new(source), 50);

    let mut rx = engine.subscribe();
    let p = rx.wait_for(|p| p.fetched == 50).await.expect("progress").clone();
    assert!(p.running);
    assert!(!p.done);
    assert!(engine.is_running());
    let partial = engine.result();
    assert_eq!(partial.len(), 50);
    assert_eq!(partial[49], "n49");

    gate.notify_one();
    // the third page waits on the gate as well
    rx.wait_for(|p| p.fetched == 100).await.expect("progress");
    gate.notify_one();

    let done = engine.finished().await;
    assert!(done.done);
    assert_eq!(engine.result().len(), 127);
}

#[tokio::test]
async fn new_run_supersedes_the_old_one() {
    let engine = PaginatedFetchEngine::<String>::new();

    let gate = Arc::new(Notify::new());
    let mut slow = Numbers::new(500);
    slow.tag = "old";
    slow.gate = Some((50, gate.clone()));
    let first = engine.start_run(Arc::new(slow), 50);

    let mut rx = engine.subscribe();
    rx.wait_for(|p| p.fetched == 50).await.expect("progress");

    let mut fresh = Numbers::new(60);
    fresh.tag = "new";
    let second = engine.start_run(Arc::new(fresh), 50);
    assert!(second > first);

    // releasing the old run must not leak its page into the new one
    gate.notify_waiters();
    let done = engine.finished().await;
    assert_eq!(done.generation, second);
    assert!(done.done);

    let items = engine.result();
    assert_eq!(items.len(), 60);
    assert!(items.iter().all(|s| s.starts_with("new")));
}

/// Holds its worker thread inside `fetch_page` until released, so an abort
/// issued meanwhile cannot land before the page is handed back.
struct Stuck {
    entered: Mutex<std::sync::mpsc::Sender<()>>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

#[async_trait]
impl PageSource for Stuck {
    type Item = String;

    fn label(&self) -> &str {
        "stuck"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<String>, FetchError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        Ok(Page::new((offset..offset + limit).map(|i| format!("old{}", i)).collect()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_of_superseded_run_is_dropped() {
    let engine = PaginatedFetchEngine::<String>::new();
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let first = engine.start_run(
        Arc::new(Stuck {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }),
        50,
    );
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("old run reached fetch_page");

    let gate = Arc::new(Notify::new());
    let mut fresh = Numbers::new(60);
    fresh.tag = "new";
    fresh.gate = Some((0, gate.clone()));
    let second = engine.start_run(Arc::new(fresh), 50);
    assert!(second > first);

    // the old task returns a full page after its run was replaced
    release_tx.send(()).expect("release");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let p = engine.snapshot();
    assert_eq!(p.generation, second);
    assert_eq!(p.fetched, 0);
    assert!(p.running);
    assert!(engine.result().is_empty());

    gate.notify_one();
    let mut rx = engine.subscribe();
    rx.wait_for(|p| p.fetched == 50).await.expect("progress");
    gate.notify_one();
    let done = engine.finished().await;
    assert_eq!(done.generation, second);
    assert!(done.done);
    let items = engine.result();
    assert_eq!(items.len(), 60);
    assert!(items.iter().all(|s| s.starts_with("new")));
}

#[tokio::test]
async fn restart_after_completion_refetches_from_scratch() {
    let engine = PaginatedFetchEngine::<String>::new();
    let source = Arc::new(Numbers::new(70));
    engine.start_run(source.clone(), 50);
    engine.finished().await;
    assert_eq!(engine.result().len(), 70);

    let g = engine.start_run(source.clone(), 50);
    assert_eq!(g, 2);
    engine.finished().await;
    assert_eq!(engine.result().len(), 70);
    assert_eq!(source.requests(), vec![0, 50, 0, 50]);
}

#[tokio::test]
async fn page_delay_paces_requests() {
    let engine = PaginatedFetchEngine::<String>::with_page_delay(Duration::from_millis(20));
    let source = Arc::new(Numbers::new(120));
    let start = std::time::Instant::now();
    engine.start_run(source, 50);
    engine.finished().await;
    // two gaps between three pages
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert_eq!(engine.result().len(), 120);
}
