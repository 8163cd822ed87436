//! Offset/limit pagination query params, clamped per spec.md §6
//! ("maximum 100").

use browsergrid_core::ports::outbound::Pagination;
use serde::Deserialize;

const MAX_LIMIT: u32 = 100;
const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    #[must_use]
    pub fn into_pagination(self) -> Pagination {
        Pagination {
            offset: self.offset.unwrap_or(0),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_to_one_hundred() {
        let q = PageQuery { offset: None, limit: Some(500) };
        assert_eq!(q.into_pagination().limit, 100);
    }

    #[test]
    fn missing_limit_defaults_to_twenty() {
        let q = PageQuery { offset: None, limit: None };
        assert_eq!(q.into_pagination().limit, 20);
    }
}
