//! Offset pagination shared by every list endpoint

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `?page=&page_size=` query parameters; out-of-range values are clamped
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// SQL `LIMIT`
    pub fn limit(&self) -> i64 {
        self.normalized().page_size as i64
    }

    /// SQL `OFFSET`
    pub fn offset(&self) -> i64 {
        let page = self.normalized();
        (page.page as i64 - 1) * page.page_size as i64
    }
}

/// One page of results plus the numbers a client needs to navigate
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, query: PageQuery) -> Self {
        let query = query.normalized();
        let total_pages = total.div_ceil(query.page_size as u64) as u32;
        Self {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages,
            has_next: query.page < total_pages,
            has_prev: query.page > 1,
        }
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_offset_math() {
        assert_eq!(PageQuery::new(1, 20).offset(), 0);
        assert_eq!(PageQuery::new(3, 20).offset(), 40);
        assert_eq!(PageQuery::new(0, 0).offset(), 0);
        assert_eq!(PageQuery::new(2, 1000).limit(), MAX_PAGE_SIZE as i64);
    }

    #[test]
    fn test_page_navigation() {
        let page = Page::new(vec![1, 2], 42, PageQuery::new(3, 20));
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next);
        assert!(page.has_prev);

        let empty: Page<i32> = Page::new(vec![], 0, PageQuery::default());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }

    #[test]
    fn test_page_map() {
        let page = Page::new(vec![1, 2, 3], 3, PageQuery::default()).map(|n| n * 10);
        assert_eq!(page.items, vec![10, 20, 30]);
        assert_eq!(page.total, 3);
    }

    proptest! {
        #[test]
        fn prop_pages_cover_every_row(total in 0u64..10_000, page_size in 1u32..=100) {
            let first = Page::<()>::new(vec![], total, PageQuery::new(1, page_size));
            let covered = first.total_pages as u64 * page_size as u64;
            prop_assert!(covered >= total);
            prop_assert!(covered < total + page_size as u64 || total == 0);
        }

        #[test]
        fn prop_offset_is_within_bounds(page in 1u32..10_000, page_size in 0u32..500) {
            let query = PageQuery::new(page, page_size);
            prop_assert!(query.limit() >= 1 && query.limit() <= MAX_PAGE_SIZE as i64);
            prop_assert_eq!(query.offset(), (page as i64 - 1) * query.limit());
        }
    }
}
