mod geoloc;
mod pipeline;

pub use geoloc::{geolocate_csv, normalize_address, GeoCache, Geocoder, GeoGate, VirtualEarth};
pub use pipeline::{extract_to_csv, ExtractReport};
