use std::path::Path;

use anyhow::Context;
use brownstone_crawler::select::document::Document;
use url::Url;

use brownstone_crawler::{Archive, FieldValue, SiteSpec, COLUMNS, MISSING};

/// Share of missing fields above which a record is flagged as suspicious.
const MISSING_WARN_RATIO: f64 = 0.3;

#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Records written to the CSV.
    pub records: usize,
    /// Listing ids whose missing-field share exceeded the warning ratio.
    pub flagged: Vec<String>,
}

/// Replays every page archived on one harvest date through the site's
/// parser and writes one record per page to `csv_path`.
///
/// Field extraction failures never abort the run (the parser isolates
/// them per field); the finished file is re-scanned and suspiciously
/// empty records are reported as warnings, not failures.
pub fn extract_to_csv(
    archive: &Archive,
    site: &dyn SiteSpec,
    csv_path: &Path,
) -> anyhow::Result<ExtractReport> {
    let source = Url::parse(site.base_url())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let collection_date = archive.date_path().to_string();
    let parser = site.page_parser();

    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("couldn't create {}", csv_path.display()))?;
    writer.write_record(COLUMNS)?;

    let mut records = 0;
    for key in archive.list_pages()? {
        log::info!("parsing {key}");
        let listing_id = Archive::page_id(&key).to_string();
        let bytes = archive.fetch_page(&key)?;
        let page = Document::from(String::from_utf8_lossy(&bytes).as_ref());

        let mut record = parser.parse(&page);
        record.set("listing_id", FieldValue::Text(listing_id));
        record.set("source", FieldValue::Text(source.clone()));
        record.set("collection_date", FieldValue::Text(collection_date.clone()));
        writer.write_record(record.row())?;
        records += 1;
    }
    writer.flush()?;

    let flagged = scan_for_empty_records(csv_path)?;
    Ok(ExtractReport { records, flagged })
}

/// Re-reads the finished CSV and warns about records whose missing-field
/// share exceeds the threshold. Advisory monitoring only.
fn scan_for_empty_records(csv_path: &Path) -> anyhow::Result<Vec<String>> {
    let id_column = COLUMNS
        .iter()
        .position(|c| *c == "listing_id")
        .unwrap_or_default();

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut flagged = Vec::new();
    for row in reader.records() {
        let row = row?;
        let nulls = row.iter().filter(|field| *field == MISSING).count();
        if nulls as f64 / COLUMNS.len() as f64 > MISSING_WARN_RATIO {
            let listing_id = row.get(id_column).unwrap_or("?").to_string();
            log::warn!("{nulls} null values in {listing_id}");
            flagged.push(listing_id);
        }
    }
    Ok(flagged)
}
