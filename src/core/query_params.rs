use serde::{Deserialize, Serialize};

use crate::config::MAX_PAGE;

/// `?page=N` on listing pages. Missing, zero or garbage means page 1;
/// anything past `MAX_PAGE` is clamped.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: Option<String>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_PAGE)
    }
}

/// `?q=...&page=N` on the search page.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    page: Option<String>,
}

impl SearchQuery {
    pub fn page(&self) -> usize {
        PageQuery {
            page: self.page.clone(),
        }
        .page()
    }
}

/// `?next=/path` on the login page.
#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    pub next: Option<String>,
}

/// One page of rows plus the links around it.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub next_url: Option<String>,
    pub prev_url: Option<String>,
}

impl<T> Paginated<T> {
    /// `rows` is expected to hold up to `per_page + 1` items; the extra row
    /// only signals that a next page exists.
    pub fn from_rows(mut rows: Vec<T>, page: usize, per_page: usize, base: &str) -> Self {
        let has_next = rows.len() > per_page;
        rows.truncate(per_page);
        Self {
            items: rows,
            page,
            next_url: has_next.then(|| page_url(base, page.saturating_add(1))),
            prev_url: (page > 1).then(|| page_url(base, page - 1)),
        }
    }

    /// Pagination driven by a known total, as search results are.
    pub fn from_total(items: Vec<T>, total: u64, page: usize, per_page: usize, base: &str) -> Self {
        let has_next = total > (page as u64).saturating_mul(per_page as u64);
        Self {
            items,
            page,
            next_url: has_next.then(|| page_url(base, page.saturating_add(1))),
            prev_url: (page > 1).then(|| page_url(base, page - 1)),
        }
    }
}

fn page_url(base: &str, page: usize) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}page={}", base, separator, page)
}

/// SQL `LIMIT`/`OFFSET` for a page, fetching one extra row.
pub fn limit_offset(page: usize, per_page: usize) -> (i64, i64) {
    let limit = i64::try_from(per_page.saturating_add(1)).unwrap_or(i64::MAX);
    let offset = i64::try_from(page.saturating_sub(1).saturating_mul(per_page)).unwrap_or(i64::MAX);
    (limit, offset)
}
