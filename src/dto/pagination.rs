use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Resolved, clamped paging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl From<&PageQuery> for Page {
    fn from(q: &PageQuery) -> Self {
        Page::new(q.page, q.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, page: Page, total: i64) -> Self {
        Self {
            items,
            page: page.page,
            page_size: page.page_size,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page() {
        let page = Page::new(None, None);
        assert_eq!(page, Page { page: 1, page_size: DEFAULT_PAGE_SIZE });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(Page::new(Some(0), Some(500)).page_size, MAX_PAGE_SIZE);
        assert_eq!(Page::new(Some(-3), Some(0)), Page { page: 1, page_size: 1 });
    }

    #[test]
    fn offset_follows_page() {
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
    }
}
