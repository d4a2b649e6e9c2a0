use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    #[error("page must be at least 1")]
    Page,
    #[error("limit must be between 1 and {MAX_LIMIT}")]
    Limit,
}

/// Validated page/limit pair. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::Page);
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(PaginationError::Limit);
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Raw `?page=&limit=` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TryFrom<PageQuery> for PageRequest {
    type Error = PaginationError;

    fn try_from(query: PageQuery) -> Result<Self, Self::Error> {
        PageRequest::new(query.page.unwrap_or(1), query.limit.unwrap_or(DEFAULT_LIMIT))
    }
}

/// Paginated response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: &PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page(),
            limit: request.limit(),
            total_pages: total.div_ceil(u64::from(request.limit())),
        }
    }
}
