//! Common API utilities and shared types
//!
//! This module contains shared utilities used across multiple API endpoints.

use serde::Deserialize;

use crate::models::ListParams;

// ============================================================================
// Pagination Defaults
// ============================================================================

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for admin listings
pub fn default_per_page() -> u32 {
    20
}

// ============================================================================
// Pagination Query Types
// ============================================================================

/// Admin pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page", alias = "perPage")]
    pub per_page: u32,
}

impl PaginationQuery {
    /// Clamped list parameters
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamp() {
        let query: PaginationQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.params(), ListParams::new(1, 20));

        let query: PaginationQuery = serde_json::from_str(r#"{"page":0,"perPage":500}"#).unwrap();
        assert_eq!(query.params(), ListParams::new(1, 100));
    }
}
