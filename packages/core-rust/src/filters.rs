//! Pagination and sorting parameters for list queries.

use serde::Serialize;

use crate::validation::{permitted_value, Validator};

/// Sort keys accepted when listing movies. A leading `-` sorts descending.
pub const MOVIE_SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// Sort direction derived from the `sort` parameter's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Page, page size and sort requested by a list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub page: usize,
    pub page_size: usize,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort: "id".to_string(),
            sort_safelist: MOVIE_SORT_SAFELIST,
        }
    }
}

impl Filters {
    /// Column to sort on, or `None` if `sort` is not in the safelist.
    ///
    /// Callers validate first; `None` therefore means a programming error
    /// upstream and should be treated as the default column.
    #[must_use]
    pub fn sort_column(&self) -> Option<&str> {
        self.sort_safelist
            .iter()
            .find(|safe| **safe == self.sort)
            .map(|safe| safe.trim_start_matches('-'))
    }

    #[must_use]
    pub fn sort_direction(&self) -> SortDirection {
        if self.sort.starts_with('-') {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

pub fn validate_filters(v: &mut Validator, f: &Filters) {
    v.check(f.page > 0, "page", "must be greater than zero");
    v.check(
        f.page <= 10_000_000,
        "page",
        "must be a maximum of 10 million",
    );
    v.check(f.page_size > 0, "page_size", "must be greater than zero");
    v.check(f.page_size <= 100, "page_size", "must be a maximum of 100");
    v.check(
        permitted_value(&f.sort.as_str(), f.sort_safelist),
        "sort",
        "invalid sort value",
    );
}

/// Pagination summary returned alongside a page of records.
///
/// All fields are zero, and omitted from JSON, when there are no records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: usize,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[must_use]
pub fn calculate_metadata(total_records: usize, page: usize, page_size: usize) -> Metadata {
    if total_records == 0 || page_size == 0 {
        return Metadata::default();
    }

    Metadata {
        current_page: page,
        page_size,
        first_page: 1,
        last_page: total_records.div_ceil(page_size),
        total_records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_column_and_direction() {
        let f = Filters {
            sort: "-year".to_string(),
            ..Filters::default()
        };
        assert_eq!(f.sort_column(), Some("year"));
        assert_eq!(f.sort_direction(), SortDirection::Descending);

        let f = Filters {
            sort: "budget".to_string(),
            ..Filters::default()
        };
        assert_eq!(f.sort_column(), None);
    }

    #[test]
    fn offset_is_zero_based() {
        let f = Filters {
            page: 3,
            page_size: 10,
            ..Filters::default()
        };
        assert_eq!(f.offset(), 20);
        assert_eq!(f.limit(), 10);
    }

    #[test]
    fn invalid_filters_reported_per_field() {
        let mut v = Validator::new();
        let f = Filters {
            page: 0,
            page_size: 101,
            sort: "budget".to_string(),
            ..Filters::default()
        };
        validate_filters(&mut v, &f);
        assert_eq!(v.errors()["page"], "must be greater than zero");
        assert_eq!(v.errors()["page_size"], "must be a maximum of 100");
        assert_eq!(v.errors()["sort"], "invalid sort value");
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let m = calculate_metadata(832, 1, 20);
        assert_eq!(m.last_page, 42);
        assert_eq!(m.first_page, 1);
        assert_eq!(m.total_records, 832);
    }

    #[test]
    fn metadata_empty_without_records() {
        let m = calculate_metadata(0, 1, 20);
        assert_eq!(m, Metadata::default());
        assert_eq!(serde_json::to_string(&m).unwrap(), "{}");
    }

    proptest::proptest! {
        #[test]
        fn last_page_covers_every_record(total in 1usize..100_000, page_size in 1usize..=100) {
            let m = calculate_metadata(total, 1, page_size);
            proptest::prop_assert!(m.last_page * page_size >= total);
            proptest::prop_assert!((m.last_page - 1) * page_size < total);
        }
    }
}
