//! Record locator: find one row by key in a paginated, filterable grid that
//! has no fetch-by-key API.
//!
//! Strategies run cheapest first:
//!
//! 1. filtered search on the grid's live filter, scanning only the current page;
//! 2. filter cleared, then a jump straight to the page holding the key,
//!    computed from the grid's client-side column data;
//! 3. a linear walk forward from the current page until "next" is disabled.
//!
//! Failures inside 1 and 2 are soft and fall through. Only the linear walk
//! can answer "not found".

use async_trait::async_trait;
use pricesync_core::{Error, Result};
use tracing::debug;

/// Opaque handle to a row on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Found(RowRef),
    NotFound,
}

/// A paginated grid as seen by the locator. Implementations bound every
/// wait they perform.
#[async_trait]
pub trait Grid: Send {
    /// Apply `text` to the live filter; `""` clears it. `Ok(false)` when the
    /// grid has no filter control.
    async fn apply_filter(&mut self, text: &str) -> Result<bool>;

    /// Wait out loading indicators, force the largest page size and wait
    /// for rows.
    async fn stabilize(&mut self) -> Result<()>;

    /// Exact match on the hidden identifier field of a row on this page.
    async fn find_by_hidden_id(&mut self, key: &str) -> Result<Option<RowRef>>;

    /// Exact (trimmed) match on the visible key column of this page.
    async fn find_by_visible_column(&mut self, key: &str) -> Result<Option<RowRef>>;

    /// Raw cell markup of the key column across all pages, when the grid
    /// exposes its client-side dataset.
    async fn column_values(&mut self) -> Result<Option<Vec<String>>>;

    async fn page_len(&mut self) -> Result<Option<usize>>;

    /// Jump to a zero-based page index.
    async fn goto_page(&mut self, index: usize) -> Result<()>;

    async fn next_disabled(&mut self) -> Result<bool>;

    async fn next_page(&mut self) -> Result<()>;
}

/// Text content of a cell, with embedded markup removed.
pub fn cell_text(markup: &str) -> String {
    let fragment = scraper::Html::parse_fragment(markup);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct RecordLocator {
    /// Guard for the linear walk.
    pub max_pages: usize,
}

impl RecordLocator {
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }

    pub async fn locate<G>(&self, grid: &mut G, key: &str) -> Result<Located>
    where
        G: Grid + ?Sized,
    {
        let filtered = match self.filtered_search(grid, key).await {
            Ok(Search::Hit(row)) => {
                debug!(key = %key, "Located via filtered search");
                return Ok(Located::Found(row));
            }
            Ok(Search::Miss) => true,
            Ok(Search::NoFilter) => false,
            Err(e) => {
                debug!(key = %key, error = %e, "Filtered search failed, falling through");
                true
            }
        };

        // An applied filter can hide the right row.
        if filtered {
            if let Err(e) = clear_filter(grid).await {
                debug!(key = %key, error = %e, "Clearing filter failed");
            }
        }

        match self.index_jump(grid, key).await {
            Ok(Some(row)) => {
                debug!(key = %key, "Located via index jump");
                return Ok(Located::Found(row));
            }
            Ok(None) => {}
            Err(e) => debug!(key = %key, error = %e, "Index jump failed, falling through"),
        }

        self.linear_walk(grid, key).await
    }

    async fn filtered_search<G>(&self, grid: &mut G, key: &str) -> Result<Search>
    where
        G: Grid + ?Sized,
    {
        if !grid.apply_filter(key).await? {
            return Ok(Search::NoFilter);
        }
        grid.stabilize().await?;
        Ok(match find_on_page(grid, key).await? {
            Some(row) => Search::Hit(row),
            None => Search::Miss,
        })
    }

    async fn index_jump<G>(&self, grid: &mut G, key: &str) -> Result<Option<RowRef>>
    where
        G: Grid + ?Sized,
    {
        let Some(values) = grid.column_values().await? else {
            return Ok(None);
        };
        let Some(page_len) = grid.page_len().await?.filter(|n| *n > 0) else {
            return Ok(None);
        };
        let Some(index) = values.iter().position(|v| cell_text(v) == key) else {
            debug!(key = %key, rows = values.len(), "Key absent from column data");
            return Ok(None);
        };
        let page = index / page_len;
        debug!(key = %key, row = index, page = page, "Jumping to page");
        grid.goto_page(page).await?;
        grid.stabilize().await?;
        find_on_page(grid, key).await
    }

    async fn linear_walk<G>(&self, grid: &mut G, key: &str) -> Result<Located>
    where
        G: Grid + ?Sized,
    {
        let mut steps = 0usize;
        loop {
            grid.stabilize().await?;
            if let Some(row) = find_on_page(grid, key).await? {
                debug!(key = %key, steps = steps, "Located via linear walk");
                return Ok(Located::Found(row));
            }
            if grid.next_disabled().await? {
                return Ok(Located::NotFound);
            }
            steps += 1;
            if steps > self.max_pages {
                return Err(Error::Locator(format!(
                    "gave up on '{}' after {} pages",
                    key, self.max_pages
                )));
            }
            grid.next_page().await?;
        }
    }
}

enum Search {
    Hit(RowRef),
    Miss,
    NoFilter,
}

/// Hidden identifier first: the visible column can carry leading zeros,
/// padding or substrings of other keys.
async fn find_on_page<G>(grid: &mut G, key: &str) -> Result<Option<RowRef>>
where
    G: Grid + ?Sized,
{
    if let Some(row) = grid.find_by_hidden_id(key).await? {
        return Ok(Some(row));
    }
    grid.find_by_visible_column(key).await
}

async fn clear_filter<G>(grid: &mut G) -> Result<()>
where
    G: Grid + ?Sized,
{
    grid.apply_filter("").await?;
    grid.stabilize().await
}
