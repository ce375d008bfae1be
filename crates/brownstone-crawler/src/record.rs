use std::collections::BTreeMap;

use select::document::Document;

/// Column order of the extraction output. Every record carries every
/// column; fields that couldn't be extracted hold the missing sentinel.
pub const COLUMNS: [&str; 23] = [
    "listing_type",
    "property_type",
    "burrough",
    "neighborhood",
    "address",
    "zip",
    "price",
    "description",
    "amenities",
    "common_charges",
    "monthly_taxes",
    "days_listed",
    "size",
    "year_built",
    "bedrooms",
    "bathrooms",
    "half_bathrooms",
    "rooms",
    "representative",
    "agency",
    "listing_id",
    "source",
    "collection_date",
];

/// Columns appended by the geolocation stage.
pub const GEO_COLUMNS: [&str; 2] = ["latitude", "longitude"];

/// Sentinel written for any field that could not be extracted, so
/// downstream consumers never see an absent value.
pub const MISSING: &str = "NULL";

/// One extracted field. Empty strings and NaN both render as the missing
/// sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Missing,
}

impl FieldValue {
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) if s.is_empty() => MISSING.to_string(),
            Self::Text(s) => s.clone(),
            Self::Number(n) if n.is_nan() => MISSING.to_string(),
            Self::Number(n) => format!("{n}"),
            Self::Integer(i) => format!("{i}"),
            Self::Missing => MISSING.to_string(),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Missing)
    }
}

/// Parses a number out of listing text, stripping currency signs,
/// thousands separators and non-breaking spaces. Unparseable text is
/// missing, not an error.
pub fn clean_number(text: &str) -> FieldValue {
    let clean: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '\u{a0}'))
        .collect();
    match clean.trim().parse::<f64>() {
        Ok(n) => FieldValue::Number(n),
        Err(_) => FieldValue::Missing,
    }
}

/// One record of the site-invariant schema. Rendering always yields every
/// column of [`COLUMNS`], absent entries included as the missing sentinel.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    values: BTreeMap<String, FieldValue>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: FieldValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> &FieldValue {
        self.values.get(column).unwrap_or(&FieldValue::Missing)
    }

    /// The record as a CSV row in [`COLUMNS`] order.
    pub fn row(&self) -> Vec<String> {
        COLUMNS.iter().map(|col| self.get(col).render()).collect()
    }
}

type Getter = Box<dyn Fn(&Document) -> anyhow::Result<FieldValue> + Send + Sync>;

/// Per-site detail-page parser built from named field getters.
///
/// Each getter is an isolated failure domain: a getter that errors is
/// logged with its field name and yields the missing sentinel, without
/// affecting any other field.
#[derive(Default)]
pub struct PageParser {
    getters: Vec<(&'static str, Getter)>,
}

impl PageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<F>(mut self, name: &'static str, getter: F) -> Self
    where
        F: Fn(&Document) -> anyhow::Result<FieldValue> + Send + Sync + 'static,
    {
        self.getters.push((name, Box::new(getter)));
        self
    }

    pub fn parse(&self, page: &Document) -> FieldMap {
        let mut record = FieldMap::new();
        for (name, getter) in &self.getters {
            let value = match getter(page) {
                Ok(value) => value,
                Err(e) => {
                    log::warn!("field '{name}' extraction failed: {e}");
                    FieldValue::Missing
                }
            };
            record.set(name, value);
        }
        record
    }
}
