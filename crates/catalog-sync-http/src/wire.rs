//! Distributor wire format and its normalization into canonical types.
//!
//! The remote API is loose about shapes: numbers arrive as strings, stock
//! may be a quantity or a Y/N flag, and the catalog may or may not be
//! wrapped in `item_catalog`. Everything is coerced here so the core only
//! ever sees [`PageResult`] and [`CatalogItem`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use catalog_sync::{
    CatalogError, CatalogFilter, CatalogItem, Credentials, PageResult, SyncMode, parse_price_cents,
};

/// Body of a catalog page request.
#[derive(Debug, Serialize)]
pub struct CatalogRequest<'a> {
    pub api_id: &'a str,
    pub locale: &'a str,
    pub sync_mode: &'static str,
    pub page: u32,
    pub rows: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_sku_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_category_list: Option<String>,
}

impl<'a> CatalogRequest<'a> {
    pub fn new(
        credentials: &'a Credentials,
        mode: SyncMode,
        filter: &CatalogFilter,
        page: u32,
        rows: u32,
    ) -> Self {
        let (item_sku_csv, item_category_list) = match filter {
            CatalogFilter::All => (None, None),
            CatalogFilter::Skus(skus) => (Some(skus.join(",")), None),
            CatalogFilter::Categories(names) => (None, Some(names.join(","))),
        };
        Self {
            api_id: &credentials.api_id,
            locale: &credentials.locale,
            sync_mode: mode.wire_code(),
            page,
            rows,
            item_sku_csv,
            item_category_list,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub item_catalog: Option<RawCatalog>,
    #[serde(default)]
    pub items: Option<Vec<RawItem>>,
    #[serde(default)]
    pub categories: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCatalog {
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub categories: Vec<Value>,
    #[serde(default, alias = "page", alias = "page_number")]
    pub page_num: Option<Value>,
    #[serde(default, alias = "total_pages")]
    pub page_total: Option<Value>,
    #[serde(default, alias = "total_items")]
    pub item_total: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawItem {
    #[serde(default, alias = "item_code", alias = "item_sku", alias = "code")]
    pub sku: Option<Value>,
    #[serde(default, alias = "item_description", alias = "desc")]
    pub description: Option<String>,
    #[serde(default, alias = "item_stock", alias = "qty", alias = "in_stock")]
    pub stock: Option<Value>,
    #[serde(default, alias = "item_price", alias = "cost")]
    pub price: Option<Value>,
    #[serde(default, alias = "msrp", alias = "retail")]
    pub retail_price: Option<Value>,
    #[serde(default, alias = "item_dimensions", alias = "dims")]
    pub dimensions: Option<String>,
    #[serde(default, alias = "item_category", alias = "category_name")]
    pub category: Option<String>,
    #[serde(default, alias = "image_url", alias = "item_image")]
    pub image: Option<String>,
}

/// Turn a decoded response into a canonical page.
///
/// Missing paging fields default to page 1, one page in total, and total
/// items = items on this page.
pub fn normalize(
    response: CatalogResponse,
    image_base_url: Option<&str>,
) -> Result<PageResult, CatalogError> {
    if let Some(error) = response.error.as_ref().and_then(text) {
        return Err(CatalogError::Remote(error));
    }

    let catalog = match response.item_catalog {
        Some(catalog) => catalog,
        None => RawCatalog {
            items: response.items.unwrap_or_default(),
            categories: response.categories.unwrap_or_default(),
            ..Default::default()
        },
    };

    let items: Vec<CatalogItem> = catalog
        .items
        .into_iter()
        .map(|raw| normalize_item(raw, image_base_url))
        .collect();

    let categories = catalog
        .categories
        .iter()
        .filter_map(|value| match value {
            Value::Object(map) => map.get("name").and_then(text),
            other => text(other),
        })
        .filter(|name| !name.is_empty())
        .collect();

    let page_number = catalog
        .page_num
        .as_ref()
        .and_then(as_u64)
        .map_or(1, clamp_u32);
    let total_pages = catalog
        .page_total
        .as_ref()
        .and_then(as_u64)
        .map_or(1, clamp_u32)
        .max(1);
    let total_items = catalog
        .item_total
        .as_ref()
        .and_then(as_u64)
        .map_or(items.len() as u32, clamp_u32);

    Ok(PageResult {
        items,
        categories,
        page_number,
        total_pages,
        total_items,
        error: None,
    })
}

fn normalize_item(raw: RawItem, image_base_url: Option<&str>) -> CatalogItem {
    let sku = raw.sku.as_ref().and_then(text).unwrap_or_default();
    let image = raw
        .image
        .map(|image| image.trim().to_owned())
        .filter(|image| !image.is_empty())
        .or_else(|| {
            let base = image_base_url?.trim_end_matches('/');
            (!sku.is_empty()).then(|| format!("{base}/{sku}.jpg"))
        });

    CatalogItem {
        description: raw.description.unwrap_or_default(),
        stock: raw.stock.as_ref().map_or(0, parse_stock),
        price_cents: raw.price.as_ref().and_then(parse_price).unwrap_or(0),
        retail_price_cents: raw.retail_price.as_ref().and_then(parse_price),
        dimensions: raw.dimensions.filter(|d| !d.trim().is_empty()),
        category: raw.category.map(|c| c.trim().to_owned()).unwrap_or_default(),
        image,
        ..CatalogItem::new(sku)
    }
}

/// Stock quantity from a number, numeric string, or availability flag.
/// Negative quantities read as zero.
pub fn parse_stock(value: &Value) -> u32 {
    match value {
        Value::Bool(true) => 1,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .map_or(0, |q| q.clamp(0, i64::from(u32::MAX)) as u32),
        Value::String(s) => {
            let s = s.trim();
            match s.to_ascii_uppercase().as_str() {
                "Y" | "YES" | "TRUE" => 1,
                "N" | "NO" | "FALSE" | "" => 0,
                _ => s
                    .parse::<f64>()
                    .map_or(0, |q| q.floor().clamp(0.0, f64::from(u32::MAX)) as u32),
            }
        }
        _ => 0,
    }
}

/// Price in cents from a number or decimal string.
pub fn parse_price(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => parse_price_cents(&n.to_string()),
        Value::String(s) => parse_price_cents(s),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn clamp_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> CatalogResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn request_carries_filter_fields() {
        let credentials = Credentials::new("id", "en");
        let filter = CatalogFilter::Skus(vec!["A".into(), "B".into()]);
        let body = serde_json::to_value(CatalogRequest::new(
            &credentials,
            SyncMode::Partial,
            &filter,
            2,
            50,
        ))
        .unwrap();

        assert_eq!(body["sync_mode"], "P");
        assert_eq!(body["item_sku_csv"], "A,B");
        assert!(body.get("item_category_list").is_none());
    }

    #[test]
    fn normalizes_wrapped_catalog() {
        let response = decode(json!({
            "item_catalog": {
                "items": [{
                    "item_code": "A-1",
                    "item_description": "*Claw hammer",
                    "stock": "12",
                    "price": "9.99",
                    "msrp": 14.5,
                    "item_dimensions": "10;2;1;0.5",
                    "item_category": "Tools"
                }],
                "categories": ["Tools", {"name": "Garden"}],
                "page_num": "2",
                "page_total": 3,
                "item_total": "250"
            }
        }));

        let page = normalize(response, None).unwrap();
        assert_eq!(page.page_number, 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_items, 250);
        assert_eq!(page.categories, vec!["Tools", "Garden"]);

        let item = &page.items[0];
        assert_eq!(item.sku, "A-1");
        assert_eq!(item.stock, 12);
        assert_eq!(item.price_cents, 999);
        assert_eq!(item.retail_price_cents, Some(1450));
        assert_eq!(item.dimensions.as_deref(), Some("10;2;1;0.5"));
        assert!(item.image.is_none());
    }

    #[test]
    fn bare_items_get_defaults() {
        let response = decode(json!({ "items": [{ "sku": "A" }, { "sku": "B" }] }));
        let page = normalize(response, None).unwrap();

        assert_eq!(page.page_number, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_items, 2);
        assert_eq!(page.items[1].price_cents, 0);
        assert!(page.items[1].retail_price_cents.is_none());
    }

    #[test]
    fn error_payload_is_remote_error() {
        let response = decode(json!({ "error": "invalid api_id" }));
        assert!(matches!(
            normalize(response, None),
            Err(CatalogError::Remote(msg)) if msg == "invalid api_id"
        ));
    }

    #[test]
    fn empty_error_field_is_ignored() {
        let response = decode(json!({ "error": "", "items": [] }));
        assert!(normalize(response, None).is_ok());
    }

    #[test]
    fn image_falls_back_to_base_url() {
        let response = decode(json!({ "items": [
            { "sku": "A" },
            { "sku": "B", "image_url": "https://cdn.example/b.png" }
        ]}));
        let page = normalize(response, Some("https://img.example/")).unwrap();

        assert_eq!(
            page.items[0].image.as_deref(),
            Some("https://img.example/A.jpg")
        );
        assert_eq!(
            page.items[1].image.as_deref(),
            Some("https://cdn.example/b.png")
        );
    }

    #[test]
    fn stock_indicators() {
        assert_eq!(parse_stock(&json!(7)), 7);
        assert_eq!(parse_stock(&json!(-3)), 0);
        assert_eq!(parse_stock(&json!("4")), 4);
        assert_eq!(parse_stock(&json!("Y")), 1);
        assert_eq!(parse_stock(&json!("n")), 0);
        assert_eq!(parse_stock(&json!(true)), 1);
        assert_eq!(parse_stock(&json!(null)), 0);
    }

    #[test]
    fn prices_from_numbers_and_strings() {
        assert_eq!(parse_price(&json!(12)), Some(1200));
        assert_eq!(parse_price(&json!(0.1)), Some(10));
        assert_eq!(parse_price(&json!("$1,299.99")), Some(129999));
        assert_eq!(parse_price(&json!("n/a")), None);
    }
}
