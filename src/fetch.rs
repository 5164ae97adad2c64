//! Incremental paginated fetch engine.
//!
//! A run walks a server-paged collection one page at a time on a spawned
//! tokio task, yielding to the scheduler between pages. Records are appended
//! to the run's accumulator in server order and can be read at any moment.
//! Starting a new run bumps the generation counter; a continuation of an older
//! run notices the mismatch when it resumes and drops its page.

use crate::error::FetchError;
use crate::models::Page;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// A remote collection that can be read page by page.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Clone + Send + Sync + 'static;

    /// Short name used in logs.
    fn label(&self) -> &str;

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<Self::Item>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    pub offset: u32,
    pub batch_size: u32,
    pub done: bool,
}

impl FetchCursor {
    pub fn new(batch_size: u32) -> Self {
        Self {
            offset: 0,
            batch_size: batch_size.max(1),
            done: false,
        }
    }

    /// Account for a page of `returned` entries. A short page ends the run.
    pub fn advance(&mut self, returned: usize) {
        if returned < self.batch_size as usize {
            self.done = true;
        } else {
            self.offset += self.batch_size;
        }
    }
}

/// Observable progress of the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProgress {
    pub generation: u64,
    pub fetched: usize,
    pub done: bool,
    pub running: bool,
    pub error: Option<FetchError>,
}

struct RunState<T> {
    generation: u64,
    cursor: FetchCursor,
    items: Vec<T>,
    running: bool,
    error: Option<FetchError>,
    task: Option<JoinHandle<()>>,
}

impl<T> RunState<T> {
    fn progress(&self) -> FetchProgress {
        FetchProgress {
            generation: self.generation,
            fetched: self.items.len(),
            done: self.cursor.done,
            running: self.running,
            error: self.error.clone(),
        }
    }
}

struct Shared<T> {
    state: Mutex<RunState<T>>,
    progress: watch::Sender<FetchProgress>,
    page_delay: Duration,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, RunState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, st: &RunState<T>) {
        self.progress.send_replace(st.progress());
    }
}

/// Handle to one engine; clones share the same run state.
pub struct PaginatedFetchEngine<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PaginatedFetchEngine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PaginatedFetchEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> PaginatedFetchEngine<T> {
    pub fn new() -> Self {
        Self::with_page_delay(Duration::ZERO)
    }

    /// Engine that waits `page_delay` between pages instead of only yielding.
    pub fn with_page_delay(page_delay: Duration) -> Self {
        let st = RunState {
            generation: 0,
            cursor: FetchCursor::new(DEFAULT_PAGE_SIZE),
            items: Vec::new(),
            running: false,
            error: None,
            task: None,
        };
        let (progress, _) = watch::channel(st.progress());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(st),
                progress,
                page_delay,
            }),
        }
    }

    /// Start a fresh run, superseding any run in flight. Must be called from
    /// within a tokio runtime. Returns the new run's generation.
    pub fn start_run<S>(&self, source: Arc<S>, page_size: u32) -> u64
    where
        S: PageSource<Item = T> + ?Sized + 'static,
    {
        let mut st = self.shared.lock();
        st.generation += 1;
        let generation = st.generation;
        st.cursor = FetchCursor::new(page_size);
        st.items = Vec::new();
        st.error = None;
        st.running = true;
        if let Some(old) = st.task.take() {
            old.abort();
        }
        info!(source = source.label(), generation, page_size = st.cursor.batch_size, "starting fetch run");
        let shared = self.shared.clone();
        st.task = Some(tokio::spawn(drive(shared, source, generation)));
        self.shared.publish(&st);
        generation
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Number of records accumulated so far in the current run.
    pub fn progress(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Current accumulator contents; valid mid-run.
    pub fn result(&self) -> Vec<T> {
        self.shared.lock().items.clone()
    }

    pub fn cursor(&self) -> FetchCursor {
        self.shared.lock().cursor
    }

    pub fn snapshot(&self) -> FetchProgress {
        self.shared.lock().progress()
    }

    /// Error that ended the current run, handed out once.
    pub fn take_error(&self) -> Option<FetchError> {
        let mut st = self.shared.lock();
        let err = st.error.take();
        if err.is_some() {
            self.shared.publish(&st);
        }
        err
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchProgress> {
        self.shared.progress.subscribe()
    }

    /// Wait until no run is in flight and return the final progress.
    pub async fn finished(&self) -> FetchProgress {
        let mut rx = self.subscribe();
        loop {
            let p = rx.borrow_and_update().clone();
            if !p.running {
                return p;
            }
            if rx.changed().await.is_err() {
                return p;
            }
        }
    }
}

async fn drive<T, S>(shared: Arc<Shared<T>>, source: Arc<S>, generation: u64)
where
    T: Clone + Send + Sync + 'static,
    S: PageSource<Item = T> + ?Sized,
{
    loop {
        let (offset, limit) = {
            let st = shared.lock();
            if st.generation != generation {
                return;
            }
            (st.cursor.offset, st.cursor.batch_size)
        };

        let page = source.fetch_page(offset, limit).await;

        {
            let mut st = shared.lock();
            if st.generation != generation {
                debug!(source = source.label(), generation, "dropping page of superseded run");
                return;
            }
            match page {
                Ok(page) => {
                    debug!(source = source.label(), offset, returned = page.returned, "page fetched");
                    st.items.extend(page.records);
                    st.cursor.advance(page.returned);
                    if st.cursor.done {
                        st.running = false;
                        st.task = None;
                        info!(source = source.label(), generation, total = st.items.len(), "fetch run complete");
                        shared.publish(&st);
                        return;
                    }
                    shared.publish(&st);
                }
                Err(e) => {
                    warn!(source = source.label(), offset, error = %e, "fetch run failed");
                    st.running = false;
                    st.error = Some(e);
                    st.task = None;
                    shared.publish(&st);
                    return;
                }
            }
        }

        if shared.page_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(shared.page_delay).await;
        }
    }
}
