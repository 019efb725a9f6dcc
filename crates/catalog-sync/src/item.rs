use serde::{Deserialize, Serialize};

/// Hard ceiling on rows requested per page, regardless of caller input.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_PAGE_SIZE)
}

/// Whether a run may create products and rewrite every field, or only
/// refresh stock and price on products already known locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Partial,
}

impl SyncMode {
    /// Single-letter code used on the distributor wire format.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Full => "F",
            Self::Partial => "P",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// Restricts which part of the remote catalog a run asks for.
///
/// SKU-driven and category-driven syncs are distinct strategies; the remote
/// API accepts one or the other, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CatalogFilter {
    #[default]
    All,
    Skus(Vec<String>),
    Categories(Vec<String>),
}

/// Account identity sent with every distributor request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: String,
    pub locale: String,
}

impl Credentials {
    pub fn new(api_id: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
            locale: locale.into(),
        }
    }
}

/// One distributor record, normalized into the canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub sku: String,
    pub description: String,
    pub stock: u32,
    pub price_cents: u64,
    pub retail_price_cents: Option<u64>,
    /// Raw `length;width;height;weight` string, parsed at reconcile time.
    pub dimensions: Option<String>,
    pub category: String,
    pub image: Option<String>,
}

impl CatalogItem {
    /// Minimal item with the given SKU, used as a starting point by tests and
    /// by the wire normalizer.
    pub fn new(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            description: String::new(),
            stock: 0,
            price_cents: 0,
            retail_price_cents: None,
            dimensions: None,
            category: String::new(),
            image: None,
        }
    }

    pub fn stock_status(&self) -> StockStatus {
        StockStatus::from_quantity(self.stock)
    }

    /// Title shown on the product: the first line of the description, with
    /// sentinel markers stripped.
    pub fn title(&self) -> String {
        let first_line = self.description.lines().next().unwrap_or_default();
        let cleaned: String = first_line
            .chars()
            .filter(|c| crate::category::SpecialCategory::from_marker(*c).is_none())
            .collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            self.sku.clone()
        } else {
            cleaned.to_owned()
        }
    }

    pub fn parsed_dimensions(&self) -> Option<Result<Dimensions, DimensionError>> {
        self.dimensions
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(Dimensions::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
}

impl StockStatus {
    pub fn from_quantity(quantity: u32) -> Self {
        if quantity > 0 {
            Self::InStock
        } else {
            Self::OutOfStock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_stock" => Self::InStock,
            _ => Self::OutOfStock,
        }
    }
}

/// Physical dimensions of a product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DimensionError {
    #[error("expected 4 fields in dimension string, found {0}")]
    FieldCount(usize),

    #[error("invalid dimension value: {0:?}")]
    InvalidNumber(String),
}

impl Dimensions {
    /// Parse a semicolon-delimited `length;width;height;weight` string.
    pub fn parse(raw: &str) -> Result<Self, DimensionError> {
        let fields: Vec<&str> = raw.trim().trim_end_matches(';').split(';').collect();
        if fields.len() != 4 {
            return Err(DimensionError::FieldCount(fields.len()));
        }

        let mut values = [0f64; 4];
        for (slot, field) in values.iter_mut().zip(&fields) {
            let trimmed = field.trim();
            *slot = trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| DimensionError::InvalidNumber(trimmed.to_owned()))?;
        }

        Ok(Self {
            length: values[0],
            width: values[1],
            height: values[2],
            weight: values[3],
        })
    }
}

/// Parse a decimal price (`"12.5"`, `"$1,299.99"`) into integer cents.
pub fn parse_price_cents(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_digits = frac.chars().chain(std::iter::repeat('0')).take(3);
    let tens = frac_digits.next()?.to_digit(10)? as u64;
    let ones = frac_digits.next()?.to_digit(10)? as u64;
    let rounding = frac_digits.next()?.to_digit(10)? as u64;

    let cents = whole.checked_mul(100)?.checked_add(tens * 10 + ones)?;
    Some(if rounding >= 5 { cents + 1 } else { cents })
}

/// One page of the remote catalog in canonical form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResult {
    pub items: Vec<CatalogItem>,
    pub categories: Vec<String>,
    pub page_number: u32,
    pub total_pages: u32,
    pub total_items: u32,
    /// Set when the page could not be fetched after retries. The page is then
    /// empty and callers decide whether to skip it or abort.
    pub error: Option<String>,
}

impl PageResult {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let total_items = items.len() as u32;
        Self {
            items,
            categories: Vec::new(),
            page_number: 1,
            total_pages: 1,
            total_items,
            error: None,
        }
    }

    pub fn failed(page_number: u32, error: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            categories: Vec::new(),
            page_number,
            total_pages: 0,
            total_items: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(250), 250);
        assert_eq!(clamp_page_size(5000), MAX_PAGE_SIZE);
    }

    #[test]
    fn dimensions_parse_four_fields() {
        let dims = Dimensions::parse("10;20.5;3;0.75").unwrap();
        assert_eq!(dims.length, 10.0);
        assert_eq!(dims.width, 20.5);
        assert_eq!(dims.height, 3.0);
        assert_eq!(dims.weight, 0.75);
    }

    #[test]
    fn dimensions_tolerate_trailing_separator() {
        assert!(Dimensions::parse("1;2;3;4;").is_ok());
    }

    #[test]
    fn dimensions_reject_wrong_field_count() {
        assert_eq!(
            Dimensions::parse("1;2;3"),
            Err(DimensionError::FieldCount(3))
        );
    }

    #[test]
    fn dimensions_reject_garbage() {
        assert!(matches!(
            Dimensions::parse("1;two;3;4"),
            Err(DimensionError::InvalidNumber(_))
        ));
    }

    #[test]
    fn price_parsing_handles_common_formats() {
        assert_eq!(parse_price_cents("12"), Some(1200));
        assert_eq!(parse_price_cents("12.5"), Some(1250));
        assert_eq!(parse_price_cents("$1,299.99"), Some(129999));
        assert_eq!(parse_price_cents("0.999"), Some(100));
        assert_eq!(parse_price_cents(".5"), Some(50));
        assert_eq!(parse_price_cents(""), None);
        assert_eq!(parse_price_cents("-3"), None);
        assert_eq!(parse_price_cents("abc"), None);
    }

    #[test]
    fn title_strips_markers_and_falls_back_to_sku() {
        let mut item = CatalogItem::new("ABC-1");
        item.description = "*Deluxe Widget\nsecond line".into();
        assert_eq!(item.title(), "Deluxe Widget");

        item.description = "*".into();
        assert_eq!(item.title(), "ABC-1");
    }

    #[test]
    fn stock_status_follows_quantity() {
        let mut item = CatalogItem::new("A");
        assert_eq!(item.stock_status(), StockStatus::OutOfStock);
        item.stock = 3;
        assert_eq!(item.stock_status(), StockStatus::InStock);
    }

    #[test]
    fn wire_codes() {
        assert_eq!(SyncMode::Full.wire_code(), "F");
        assert_eq!(SyncMode::Partial.wire_code(), "P");
    }
}
