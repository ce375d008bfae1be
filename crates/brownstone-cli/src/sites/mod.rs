//! Per-site crawl and parse plug-ins.

mod cityrealty;

use anyhow::bail;
use brownstone_crawler::SiteSpec;

const KNOWN_SITES: [&str; 1] = ["cityrealty"];

pub fn by_name(name: &str) -> anyhow::Result<Box<dyn SiteSpec>> {
    match name {
        "cityrealty" => Ok(Box::new(cityrealty::CityRealty)),
        _ => bail!("unknown site {name:?}, expected one of {KNOWN_SITES:?}"),
    }
}
