use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use duet_types::api::Query;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// One page fetch to issue against the messages collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Newest first within one relationship, continuing after `cursor`.
    pub fn queries(&self, relationship_id: &str) -> Vec<Query> {
        let mut queries = vec![
            Query::equal("relationshipId", relationship_id),
            Query::order_desc("$createdAt"),
            Query::limit(self.limit),
        ];
        if let Some(cursor) = &self.cursor {
            queries.push(Query::cursor_after(cursor));
        }
        queries
    }
}

/// Tracks the paging cursor for one chat. At most one page request is in
/// flight; a short or empty page ends paging for good.
#[derive(Debug, Clone)]
pub struct PaginationController {
    page_size: u32,
    cursor: Option<String>,
    has_more: bool,
    in_flight: bool,
}

impl Default for PaginationController {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PaginationController {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            cursor: None,
            has_more: true,
            in_flight: false,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Newest page. Refused while another request is outstanding.
    pub fn begin_initial(&mut self) -> Option<PageRequest> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            limit: self.page_size,
            cursor: None,
        })
    }

    /// Next older page. Refused while in flight, after exhaustion, or
    /// before the first page has produced a cursor.
    pub fn begin_next(&mut self) -> Option<PageRequest> {
        if self.in_flight || !self.has_more {
            return None;
        }
        let cursor = self.cursor.clone()?;
        self.in_flight = true;
        Some(PageRequest {
            limit: self.page_size,
            cursor: Some(cursor),
        })
    }

    /// Record a successful page of `page_len` messages ending at `last_id`.
    pub fn complete(&mut self, page_len: usize, last_id: Option<&str>) {
        self.in_flight = false;
        if page_len < self.page_size as usize {
            self.has_more = false;
        }
        if let Some(id) = last_id {
            self.cursor = Some(id.to_string());
        }
    }

    /// A failed request leaves cursor and exhaustion untouched.
    pub fn fail(&mut self) {
        self.in_flight = false;
    }

    /// Continue after `cursor` instead; used when the old cursor document
    /// no longer exists.
    pub fn rewind(&mut self, cursor: Option<&str>) {
        self.cursor = cursor.map(str::to_owned);
    }
}

/// Trailing-edge debounce: of several `wait()` calls made within `delay` of
/// each other, only the last one returns `true`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn wait(&self) -> bool {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        self.generation.load(Ordering::SeqCst) == ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewind_moves_cursor_back() {
        let mut pager = PaginationController::new(2);
        pager.begin_initial().unwrap();
        pager.complete(2, Some("m2"));
        pager.rewind(Some("m1"));
        assert_eq!(pager.begin_next().unwrap().cursor.as_deref(), Some("m1"));

        pager.fail();
        pager.rewind(None);
        assert!(pager.begin_next().is_none());
        assert!(pager.has_more());
    }

    #[test]
    fn short_page_ends_paging() {
        let mut pager = PaginationController::new(10);
        let first = pager.begin_initial().unwrap();
        assert_eq!(first.cursor, None);
        assert!(pager.begin_initial().is_none());
        pager.complete(10, Some("m10"));

        let next = pager.begin_next().unwrap();
        assert_eq!(next.cursor.as_deref(), Some("m10"));
        pager.complete(4, Some("m14"));

        assert!(!pager.has_more());
        assert!(pager.begin_next().is_none());
    }

    #[test]
    fn failure_keeps_cursor() {
        let mut pager = PaginationController::new(2);
        pager.begin_initial();
        pager.complete(2, Some("b"));
        pager.begin_next();
        pager.fail();
        assert_eq!(pager.cursor(), Some("b"));
        assert!(pager.has_more());
        assert!(!pager.in_flight());
    }

    #[test]
    fn empty_page_without_cursor() {
        let mut pager = PaginationController::default();
        pager.begin_initial();
        pager.complete(0, None);
        assert!(!pager.has_more());
        assert!(pager.begin_next().is_none());
    }

    #[test]
    fn queries_carry_cursor() {
        let request = PageRequest { limit: 10, cursor: Some("m9".into()) };
        let queries = request.queries("rel");
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[3], Query::cursor_after("m9"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_trailing_call_proceeds() {
        let debouncer = Debouncer::default();
        let a = tokio::spawn({
            let d = debouncer.clone();
            async move { d.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let b = tokio::spawn({
            let d = debouncer.clone();
            async move { d.wait().await }
        });

        assert!(!a.await.unwrap());
        assert!(b.await.unwrap());
        assert!(debouncer.wait().await);
    }
}
