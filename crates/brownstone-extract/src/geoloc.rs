use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use brownstone_crawler::{COLUMNS, GEO_COLUMNS, MISSING};

/// Resolves an address to coordinates. `(NaN, NaN)` is the unresolved
/// sentinel: the address exists in the data but the provider couldn't
/// place it.
pub trait Geocoder {
    fn geocode(&self, postcode: &str, locality: &str, address: &str) -> (f64, f64);
}

const VIRTUALEARTH_URL: &str = "http://dev.virtualearth.net/REST/v1/Locations?CountryRegion=US\
                                &adminDistrict=NY&postalCode={zip}&locality={locality}\
                                &addressLine={address}&key={key}";

/// Bing Maps (Virtual Earth) REST geocoder.
pub struct VirtualEarth {
    key: String,
    client: reqwest::blocking::Client,
}

impl VirtualEarth {
    pub fn new(key: String) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { key, client })
    }

    fn parse_coordinates(response: &serde_json::Value) -> Option<(f64, f64)> {
        let coordinates = response
            .get("resourceSets")?
            .get(0)?
            .get("resources")?
            .get(0)?
            .get("geocodePoints")?
            .get(0)?
            .get("coordinates")?;
        Some((coordinates.get(0)?.as_f64()?, coordinates.get(1)?.as_f64()?))
    }
}

impl Geocoder for VirtualEarth {
    fn geocode(&self, postcode: &str, locality: &str, address: &str) -> (f64, f64) {
        let url = VIRTUALEARTH_URL
            .replace("{zip}", postcode)
            .replace("{locality}", locality)
            .replace("{address}", address)
            .replace("{key}", &self.key)
            .replace(' ', "%20");
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<serde_json::Value>());
        match response {
            Ok(body) => Self::parse_coordinates(&body).unwrap_or((f64::NAN, f64::NAN)),
            Err(e) => {
                log::error!("geocoding request failed: {e}");
                (f64::NAN, f64::NAN)
            }
        }
    }
}

/// Cuts unit/suite/apartment suffixes off an address.
///
/// Such suffixes fragment otherwise identical addresses, which would
/// defeat both the cache and the geocoder. Matching is case-insensitive.
pub fn normalize_address(address: &str) -> String {
    let haystack = address.to_ascii_lowercase();
    for pattern in [" unit ", " #", " apt "] {
        if let Some(idx) = haystack.find(pattern) {
            return address[..idx].trim().to_string();
        }
    }
    address.trim().to_string()
}

/// Persistent geocoding cache keyed by `{postcode}|{locality}|{address}`.
///
/// Entries are never updated in place: an address's coordinates are
/// assumed stable.
pub struct GeoCache {
    path: PathBuf,
    entries: HashMap<String, (f64, f64)>,
}

impl GeoCache {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let bytes = fs::read(&path)
                .with_context(|| format!("couldn't read {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt geocache {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    fn cache_key(postcode: &str, locality: &str, address: &str) -> String {
        format!("{postcode}|{locality}|{address}")
    }

    pub fn get(&self, postcode: &str, locality: &str, address: &str) -> Option<(f64, f64)> {
        self.entries
            .get(&Self::cache_key(postcode, locality, address))
            .copied()
    }

    pub fn insert(
        &mut self,
        postcode: &str,
        locality: &str,
        address: &str,
        coordinates: (f64, f64),
    ) -> anyhow::Result<()> {
        self.entries
            .insert(Self::cache_key(postcode, locality, address), coordinates);
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The cache gate in front of the external geocoder: at most one external
/// call per unique normalized address.
pub struct GeoGate {
    cache: GeoCache,
    geocoder: Box<dyn Geocoder>,
}

impl GeoGate {
    pub fn new(cache: GeoCache, geocoder: Box<dyn Geocoder>) -> Self {
        Self { cache, geocoder }
    }

    /// Cache lookup first; on a miss, one external call, cached only when
    /// the result is resolved.
    pub fn resolve(
        &mut self,
        postcode: &str,
        locality: &str,
        address: &str,
    ) -> anyhow::Result<(f64, f64)> {
        let address = normalize_address(address);
        if let Some(cached) = self.cache.get(postcode, locality, &address) {
            return Ok(cached);
        }
        let (lat, lon) = self.geocoder.geocode(postcode, locality, &address);
        if !lat.is_nan() && !lon.is_nan() {
            self.cache.insert(postcode, locality, &address, (lat, lon))?;
        }
        Ok((lat, lon))
    }
}

/// Copies the extract CSV and appends latitude/longitude columns resolved
/// through the cache gate. Unresolved coordinates are written as the NULL
/// sentinel.
pub fn geolocate_csv(input: &Path, output: &Path, gate: &mut GeoGate) -> anyhow::Result<usize> {
    let column = |name: &str| {
        COLUMNS
            .iter()
            .position(|c| *c == name)
            .with_context(|| format!("column {name} missing from schema"))
    };
    let zip_idx = column("zip")?;
    let burrough_idx = column("burrough")?;
    let address_idx = column("address")?;

    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("couldn't read {}", input.display()))?;
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("couldn't create {}", output.display()))?;
    writer.write_record(COLUMNS.iter().chain(GEO_COLUMNS.iter()))?;

    let render = |v: f64| {
        if v.is_nan() {
            MISSING.to_string()
        } else {
            format!("{v}")
        }
    };

    let mut rows = 0;
    for row in reader.records() {
        let row = row?;
        let zip = row.get(zip_idx).unwrap_or_default();
        let burrough = row.get(burrough_idx).unwrap_or_default();
        let address = row.get(address_idx).unwrap_or_default();

        let (lat, lon) = gate.resolve(zip, burrough, address)?;
        let mut out: Vec<String> = row.iter().map(str::to_string).collect();
        out.push(render(lat));
        out.push(render(lon));
        writer.write_record(&out)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingGeocoder {
        calls: Rc<Cell<u32>>,
        result: (f64, f64),
    }

    impl Geocoder for CountingGeocoder {
        fn geocode(&self, _postcode: &str, _locality: &str, _address: &str) -> (f64, f64) {
            self.calls.set(self.calls.get() + 1);
            self.result
        }
    }

    #[test]
    fn unit_suffixes_normalize_away() {
        assert_eq!(normalize_address("12 Main St Unit 4B"), "12 Main St");
        assert_eq!(normalize_address("12 Main St Unit 9"), "12 Main St");
        assert_eq!(normalize_address("12 Main St #4B"), "12 Main St");
        assert_eq!(normalize_address("12 Main St APT 7"), "12 Main St");
        assert_eq!(normalize_address("12 Main St"), "12 Main St");
    }

    #[test]
    fn second_resolve_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut gate = GeoGate::new(
            GeoCache::open(dir.path().join("geocache.json")).unwrap(),
            Box::new(CountingGeocoder {
                calls: calls.clone(),
                result: (40.73, -73.99),
            }),
        );

        let first = gate.resolve("10003", "Manhattan", "12 Main St Unit 4B").unwrap();
        let second = gate.resolve("10003", "Manhattan", "12 Main St Unit 9").unwrap();

        // different units, same normalized address: one external call
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
        assert_eq!(first, (40.73, -73.99));
    }

    #[test]
    fn unresolved_results_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut gate = GeoGate::new(
            GeoCache::open(dir.path().join("geocache.json")).unwrap(),
            Box::new(CountingGeocoder {
                calls: calls.clone(),
                result: (f64::NAN, f64::NAN),
            }),
        );

        let (lat, _) = gate.resolve("10003", "Manhattan", "12 Main St").unwrap();
        assert!(lat.is_nan());
        gate.resolve("10003", "Manhattan", "12 Main St").unwrap();
        // every miss re-queries the provider
        assert_eq!(calls.get(), 2);
        assert!(gate.cache.is_empty());
    }

    #[test]
    fn cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocache.json");
        {
            let mut cache = GeoCache::open(&path).unwrap();
            cache
                .insert("10003", "Manhattan", "12 Main St", (40.73, -73.99))
                .unwrap();
        }
        let cache = GeoCache::open(&path).unwrap();
        assert_eq!(
            cache.get("10003", "Manhattan", "12 Main St"),
            Some((40.73, -73.99))
        );
    }

    #[test]
    fn virtualearth_responses_parse_down_to_coordinates() {
        let body: serde_json::Value = serde_json::json!({
            "resourceSets": [{
                "resources": [{
                    "geocodePoints": [{ "coordinates": [40.73, -73.99] }]
                }]
            }]
        });
        assert_eq!(
            VirtualEarth::parse_coordinates(&body),
            Some((40.73, -73.99))
        );
        assert_eq!(
            VirtualEarth::parse_coordinates(&serde_json::json!({})),
            None
        );
    }

    #[test]
    fn geolocated_csv_appends_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("extract.csv");
        let output = dir.path().join("coordinates.csv");

        let mut writer = csv::Writer::from_path(&input).unwrap();
        writer.write_record(COLUMNS).unwrap();
        let mut row: Vec<String> = COLUMNS.iter().map(|_| MISSING.to_string()).collect();
        row[COLUMNS.iter().position(|c| *c == "zip").unwrap()] = "10003".into();
        row[COLUMNS.iter().position(|c| *c == "burrough").unwrap()] = "Manhattan".into();
        row[COLUMNS.iter().position(|c| *c == "address").unwrap()] = "12 Main St".into();
        writer.write_record(&row).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let calls = Rc::new(Cell::new(0));
        let mut gate = GeoGate::new(
            GeoCache::open(dir.path().join("geocache.json")).unwrap(),
            Box::new(CountingGeocoder {
                calls,
                result: (40.73, -73.99),
            }),
        );
        let rows = geolocate_csv(&input, &output, &mut gate).unwrap();
        assert_eq!(rows, 1);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers: Vec<_> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers.last().map(String::as_str), Some("longitude"));
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.get(COLUMNS.len()), Some("40.73"));
        assert_eq!(record.get(COLUMNS.len() + 1), Some("-73.99"));
    }
}
