//! Catalog rules: slugs, product search parameters, prices and ratings.

use std::collections::BTreeMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::{ShopError, ShopResult};

pub const MAX_PRICE_SCALE: i64 = 2;
/// Prices are stored as NUMERIC(10, 2).
pub const MAX_PRICE: i64 = 100_000_000;
pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 10;
pub const RATING_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

pub fn is_valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value.trim() == value
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to one
/// `-`, no leading or trailing dash.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Use the supplied slug when present, otherwise derive one from `name`.
pub fn resolve_slug(explicit: Option<&str>, name: &str) -> ShopResult<String> {
    let slug = match explicit {
        Some(slug) if !slug.is_empty() => slug.to_string(),
        _ => slugify(name),
    };
    if !is_valid_slug(&slug) {
        return Err(ShopError::validation(format!(
            "slug '{slug}' must be lowercase letters, digits and dashes"
        )));
    }
    Ok(slug)
}

pub fn validate_name(field: &str, value: &str) -> ShopResult<()> {
    if value.trim().is_empty() {
        return Err(ShopError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub fn validate_price(price: &BigDecimal) -> ShopResult<()> {
    if price < &BigDecimal::zero() {
        return Err(ShopError::validation("price must not be negative"));
    }
    if price >= &BigDecimal::from(MAX_PRICE) {
        return Err(ShopError::validation(format!("price must be below {MAX_PRICE}")));
    }
    let (_, scale) = price.as_bigint_and_exponent();
    if scale > MAX_PRICE_SCALE {
        return Err(ShopError::validation(format!(
            "price must have at most {MAX_PRICE_SCALE} decimal places"
        )));
    }
    Ok(())
}

pub fn validate_stock(stock: i32) -> ShopResult<()> {
    if stock < 0 {
        return Err(ShopError::validation("stock must be >= 0"));
    }
    Ok(())
}

pub fn validate_rating(rating: i32) -> ShopResult<()> {
    if !RATING_RANGE.contains(&rating) {
        return Err(ShopError::validation("rating must be between 1 and 5"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    PriceAsc,
    PriceDesc,
    #[default]
    Newest,
    Oldest,
    NameAsc,
    NameDesc,
}

impl ProductSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductSort::PriceAsc => "price_asc",
            ProductSort::PriceDesc => "price_desc",
            ProductSort::Newest => "newest",
            ProductSort::Oldest => "oldest",
            ProductSort::NameAsc => "name_asc",
            ProductSort::NameDesc => "name_desc",
        }
    }
}

impl FromStr for ProductSort {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ProductSort::PriceAsc,
            ProductSort::PriceDesc,
            ProductSort::Newest,
            ProductSort::Oldest,
            ProductSort::NameAsc,
            ProductSort::NameDesc,
        ]
        .into_iter()
        .find(|sort| sort.as_str() == s)
        .ok_or_else(|| ShopError::validation(format!("unknown sort key '{s}'")))
    }
}

/// Product search parameters. `only_active` defaults to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category_id: Option<i32>,
    pub min_price: Option<BigDecimal>,
    pub max_price: Option<BigDecimal>,
    pub only_active: bool,
    pub sort: ProductSort,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            search: None,
            category_id: None,
            min_price: None,
            max_price: None,
            only_active: true,
            sort: ProductSort::default(),
        }
    }
}

impl ProductFilter {
    pub fn validate(&self) -> ShopResult<()> {
        for bound in [&self.min_price, &self.max_price].into_iter().flatten() {
            if bound < &BigDecimal::zero() {
                return Err(ShopError::validation("price bounds must not be negative"));
            }
        }
        if let (Some(min), Some(max)) = (&self.min_price, &self.max_price) {
            if min > max {
                return Err(ShopError::validation("min_price must not exceed max_price"));
            }
        }
        Ok(())
    }

    /// Search text trimmed, `None` when blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    /// `ILIKE` pattern for the search term with the wildcards `%` and `_`
    /// escaped, so they match literally as they do in [`Self::matches`].
    pub fn like_pattern(&self) -> Option<String> {
        let term = self.search_term()?;
        let mut pattern = String::with_capacity(term.len() + 2);
        pattern.push('%');
        for ch in term.chars() {
            if matches!(ch, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push('%');
        Some(pattern)
    }

    /// In-memory counterpart of the SQL predicate: case-insensitive
    /// substring over name and description, inclusive price bounds.
    pub fn matches(
        &self,
        name: &str,
        description: Option<&str>,
        price: &BigDecimal,
        category_id: i32,
        is_active: bool,
    ) -> bool {
        if self.only_active && !is_active {
            return false;
        }
        if self.category_id.is_some_and(|id| id != category_id) {
            return false;
        }
        if self.min_price.as_ref().is_some_and(|min| price < min) {
            return false;
        }
        if self.max_price.as_ref().is_some_and(|max| price > max) {
            return false;
        }
        match self.search_term() {
            Some(term) => {
                let term = term.to_lowercase();
                name.to_lowercase().contains(&term)
                    || description.is_some_and(|d| d.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub product_id: i32,
    pub average_rating: Option<f64>,
    pub total_reviews: i64,
    /// Keyed by star value 1 through 5; every key is present.
    pub rating_distribution: BTreeMap<i32, i64>,
}

impl RatingSummary {
    pub fn from_counts(product_id: i32, counts: &[(i32, i64)]) -> Self {
        let mut rating_distribution: BTreeMap<i32, i64> =
            RATING_RANGE.map(|rating| (rating, 0)).collect();
        for (rating, count) in counts {
            *rating_distribution.entry(*rating).or_insert(0) += count;
        }

        let total_reviews: i64 = rating_distribution.values().sum();
        let average_rating = (total_reviews > 0).then(|| {
            let weighted: i64 = rating_distribution
                .iter()
                .map(|(rating, count)| i64::from(*rating) * count)
                .sum();
            let avg = weighted as f64 / total_reviews as f64;
            (avg * 100.0).round() / 100.0
        });

        Self {
            product_id,
            average_rating,
            total_reviews,
            rating_distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("Green Tea", "green-tea")]
    #[case("  Cast-Iron   Kettle!! ", "cast-iron-kettle")]
    #[case("Mug 350ml", "mug-350ml")]
    fn slugify_collapses_separators(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(slugify(name), expected);
    }

    #[test]
    fn resolve_slug_prefers_explicit_value() {
        assert_eq!(resolve_slug(Some("custom-1"), "Name").unwrap(), "custom-1");
        assert_eq!(resolve_slug(None, "Black Tea").unwrap(), "black-tea");
        assert_eq!(resolve_slug(Some(""), "Black Tea").unwrap(), "black-tea");
        assert!(resolve_slug(Some("Not Valid"), "x").is_err());
        assert!(resolve_slug(None, "!!!").is_err());
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(5, true)]
    #[case(6, false)]
    fn rating_bounds(#[case] rating: i32, #[case] ok: bool) {
        assert_eq!(validate_rating(rating).is_ok(), ok);
    }

    #[test]
    fn price_rules() {
        assert!(validate_price(&dec("0")).is_ok());
        assert!(validate_price(&dec("19.99")).is_ok());
        assert!(validate_price(&dec("-0.01")).is_err());
        assert!(validate_price(&dec("1.999")).is_err());
    }

    #[test]
    fn sort_parses_wire_names() {
        assert_eq!("price_desc".parse::<ProductSort>().unwrap(), ProductSort::PriceDesc);
        assert_eq!(ProductSort::default(), ProductSort::Newest);
        assert!("cheapest".parse::<ProductSort>().is_err());
    }

    #[test]
    fn filter_rejects_inverted_price_range() {
        let filter = ProductFilter {
            min_price: Some(dec("10")),
            max_price: Some(dec("5")),
            ..ProductFilter::default()
        };
        assert!(filter.validate().is_err());
    }

    #[test]
    fn filter_matches_text_price_and_activity() {
        let filter = ProductFilter {
            search: Some(" TEA ".to_string()),
            min_price: Some(dec("1.00")),
            max_price: Some(dec("5.00")),
            ..ProductFilter::default()
        };
        assert!(filter.matches("Green Tea", None, &dec("3.00"), 1, true));
        assert!(filter.matches("Sampler", Some("assorted teas"), &dec("5.00"), 1, true));
        assert!(!filter.matches("Green Tea", None, &dec("5.01"), 1, true));
        assert!(!filter.matches("Green Tea", None, &dec("3.00"), 1, false));
        assert!(!filter.matches("Coffee", None, &dec("3.00"), 1, true));
    }

    #[rstest]
    #[case(" tea ", Some("%tea%"))]
    #[case("50%", Some("%50\\%%"))]
    #[case("snake_case", Some("%snake\\_case%"))]
    #[case("back\\slash", Some("%back\\\\slash%"))]
    #[case("   ", None)]
    fn like_pattern_escapes_wildcards(#[case] search: &str, #[case] expected: Option<&str>) {
        let filter = ProductFilter {
            search: Some(search.to_string()),
            ..ProductFilter::default()
        };
        assert_eq!(filter.like_pattern().as_deref(), expected);
    }

    #[test]
    fn percent_in_search_is_literal() {
        let filter = ProductFilter {
            search: Some("100%".to_string()),
            ..ProductFilter::default()
        };
        assert!(filter.matches("100% Cotton Tee", None, &dec("9.00"), 1, true));
        assert!(!filter.matches("1000 Piece Puzzle", None, &dec("9.00"), 1, true));
    }

    #[test]
    fn rating_summary_fills_every_star() {
        let summary = RatingSummary::from_counts(3, &[(5, 2), (4, 1)]);
        assert_eq!(summary.total_reviews, 3);
        assert_eq!(summary.average_rating, Some(4.67));
        assert_eq!(summary.rating_distribution[&1], 0);
        assert_eq!(summary.rating_distribution[&5], 2);

        let empty = RatingSummary::from_counts(3, &[]);
        assert_eq!(empty.average_rating, None);
        assert_eq!(empty.total_reviews, 0);
    }
}
