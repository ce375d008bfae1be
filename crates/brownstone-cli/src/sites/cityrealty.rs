//! CityRealty rental listings: index traversal and detail-page field
//! extraction.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use brownstone_crawler::select::document::Document;
use brownstone_crawler::select::predicate::{Class, Name, Predicate};
use brownstone_crawler::{clean_number, FieldValue, PageParser, SiteSpec};

const BASE_URL: &str = "https://www.cityrealty.com";

pub struct CityRealty;

impl SiteSpec for CityRealty {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn seed(&self) -> String {
        format!("{BASE_URL}/nyc/apartments-for-rent/search-results#?page=1")
    }

    fn stop_test(&self, page: &Document) -> bool {
        // the "next" arrow is ng-hidden on the last page of listings
        page.find(Name("li").and(Class("next")).and(Class("ng-hide")))
            .next()
            .is_some()
    }

    fn parsable_links(&self, page: &Document) -> Vec<String> {
        page.find(Name("span").and(Class("lst_name")))
            .filter_map(|span| span.find(Name("a")).next())
            .filter_map(|a| a.attr("href").map(str::to_string))
            .collect()
    }

    fn browsable_links(&self, url: &str, _page: &Document) -> Vec<String> {
        next_page(url).into_iter().collect()
    }

    fn page_parser(&self) -> PageParser {
        // zip, property_type, common_charges, monthly_taxes and rooms are
        // not published on rental pages; they stay at the missing sentinel
        PageParser::new()
            .field("listing_type", get_listing_type)
            .field("burrough", get_burrough)
            .field("neighborhood", get_neighborhood)
            .field("address", get_address)
            .field("price", get_price)
            .field("description", get_description)
            .field("amenities", get_amenities)
            .field("days_listed", get_days_listed)
            .field("size", get_size)
            .field("year_built", get_year_built)
            .field("bedrooms", get_bedrooms)
            .field("bathrooms", get_bathrooms)
            .field("half_bathrooms", get_half_bathrooms)
            .field("representative", get_representative)
            .field("agency", get_agency)
    }
}

static PAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"page=(\d+)").unwrap());

/// Next index page, by incrementing the page number in the current URL.
fn next_page(url: &str) -> Option<String> {
    let caps = PAGE_RE.captures(url)?;
    let number: u32 = caps.get(1)?.as_str().parse().ok()?;
    let span = caps.get(0)?;
    Some(format!(
        "{}page={}{}",
        &url[..span.start()],
        number + 1,
        &url[span.end()..]
    ))
}

static NEIGHBORHOOD_BURROUGHS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("battery park city", "Manhattan"),
        ("carnegie hill", "Manhattan"),
        ("chelsea", "Manhattan"),
        ("chinatown", "Manhattan"),
        ("east harlem", "Manhattan"),
        ("east village", "Manhattan"),
        ("financial district", "Manhattan"),
        ("flatiron", "Manhattan"),
        ("gramercy park", "Manhattan"),
        ("greenwich village", "Manhattan"),
        ("hamilton heights", "Manhattan"),
        ("harlem", "Manhattan"),
        ("hell's kitchen", "Manhattan"),
        ("inwood", "Manhattan"),
        ("kips bay", "Manhattan"),
        ("lower east side", "Manhattan"),
        ("midtown east", "Manhattan"),
        ("midtown west", "Manhattan"),
        ("morningside heights", "Manhattan"),
        ("murray hill", "Manhattan"),
        ("noho", "Manhattan"),
        ("nolita", "Manhattan"),
        ("soho", "Manhattan"),
        ("tribeca", "Manhattan"),
        ("upper east side", "Manhattan"),
        ("upper west side", "Manhattan"),
        ("washington heights", "Manhattan"),
        ("west village", "Manhattan"),
        ("bay ridge", "Brooklyn"),
        ("bedford-stuyvesant", "Brooklyn"),
        ("boerum hill", "Brooklyn"),
        ("brooklyn heights", "Brooklyn"),
        ("bushwick", "Brooklyn"),
        ("carroll gardens", "Brooklyn"),
        ("clinton hill", "Brooklyn"),
        ("cobble hill", "Brooklyn"),
        ("crown heights", "Brooklyn"),
        ("downtown brooklyn", "Brooklyn"),
        ("dumbo", "Brooklyn"),
        ("fort greene", "Brooklyn"),
        ("greenpoint", "Brooklyn"),
        ("park slope", "Brooklyn"),
        ("prospect heights", "Brooklyn"),
        ("williamsburg", "Brooklyn"),
        ("astoria", "Queens"),
        ("flushing", "Queens"),
        ("forest hills", "Queens"),
        ("jackson heights", "Queens"),
        ("long island city", "Queens"),
        ("rego park", "Queens"),
        ("ridgewood", "Queens"),
        ("sunnyside", "Queens"),
        ("concourse", "Bronx"),
        ("mott haven", "Bronx"),
        ("riverdale", "Bronx"),
        ("st. george", "Staten Island"),
    ])
});

fn get_listing_type(page: &Document) -> anyhow::Result<FieldValue> {
    let label = page
        .find(Name("span"))
        .find(|span| span.text() == "Building Type")
        .ok_or_else(|| anyhow!("no building type label"))?;
    let value = label
        .next()
        .and_then(|n| n.next())
        .ok_or_else(|| anyhow!("no building type value"))?;
    if value.name() == Some("span") {
        Ok(FieldValue::Text(value.text().trim().to_string()))
    } else {
        Ok(FieldValue::Missing)
    }
}

fn neighborhood_text(page: &Document) -> anyhow::Result<String> {
    let icon = page
        .find(Name("i").and(Class("fa")).and(Class("fa-map-signs")))
        .next()
        .ok_or_else(|| anyhow!("no map-signs icon"))?;
    let sibling = icon
        .parent()
        .and_then(|p| p.next())
        .and_then(|n| n.next())
        .ok_or_else(|| anyhow!("no neighborhood sibling"))?;
    if sibling.name() != Some("span") {
        return Err(anyhow!("unexpected neighborhood markup"));
    }
    let link = sibling
        .find(Name("a"))
        .next()
        .ok_or_else(|| anyhow!("no neighborhood link"))?;
    Ok(link.text().trim().to_string())
}

fn get_neighborhood(page: &Document) -> anyhow::Result<FieldValue> {
    Ok(FieldValue::Text(neighborhood_text(page)?))
}

fn get_burrough(page: &Document) -> anyhow::Result<FieldValue> {
    let neighborhood = neighborhood_text(page)?.to_lowercase();
    Ok(NEIGHBORHOOD_BURROUGHS
        .get(neighborhood.as_str())
        .map(|b| FieldValue::Text(b.to_string()))
        .unwrap_or(FieldValue::Missing))
}

fn get_address(page: &Document) -> anyhow::Result<FieldValue> {
    let title = page
        .find(Name("h1").and(Class("bld_title")))
        .next()
        .ok_or_else(|| anyhow!("no building title"))?;
    Ok(FieldValue::Text(title.text().trim().to_string()))
}

fn get_price(page: &Document) -> anyhow::Result<FieldValue> {
    let price = page
        .find(Name("span").and(Class("price")))
        .next()
        .ok_or_else(|| anyhow!("no price tag"))?;
    Ok(clean_number(&price.text()))
}

fn get_description(page: &Document) -> anyhow::Result<FieldValue> {
    let text = page
        .find(Name("div").and(Class("wysiwyg")))
        .next()
        .ok_or_else(|| anyhow!("no description"))?
        .text()
        .replace('\n', " ");
    Ok(FieldValue::Text(text.trim().to_string()))
}

fn get_amenities(page: &Document) -> anyhow::Result<FieldValue> {
    let mut amenities: Vec<String> = Vec::new();
    let sections = [
        Name("div").and(Class("amenities")).and(Class("section")),
        Name("div")
            .and(Class("building_features"))
            .and(Class("closed")),
    ];
    for section in sections {
        if let Some(node) = page.find(section).next() {
            for li in node.find(Name("li")) {
                amenities.push(li.text().trim().to_string());
            }
        }
    }
    Ok(FieldValue::Text(amenities.join(", ")))
}

static DATE_LISTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Listed\s+(.+)").unwrap());

fn get_days_listed(page: &Document) -> anyhow::Result<FieldValue> {
    let listed = page
        .find(Name("div").and(Class("_content")).and(Class("_listed")))
        .next()
        .and_then(|div| div.find(Name("span")).next())
        .ok_or_else(|| anyhow!("no listing date tag"))?
        .text();
    let date = DATE_LISTED_RE
        .captures(&listed)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| anyhow!("unrecognized listing date {listed:?}"))?
        .as_str()
        .trim()
        .to_string();
    let date = ["%B %e, %Y", "%b %e, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&date, fmt).ok())
        .ok_or_else(|| anyhow!("unparsable listing date {date:?}"))?;
    // listings start at day 1
    let days = (Utc::now().date_naive() - date).num_days() + 1;
    Ok(FieldValue::Integer(days))
}

fn beds_baths_text(page: &Document) -> anyhow::Result<String> {
    Ok(page
        .find(Name("span").and(Class("beds_baths")))
        .next()
        .ok_or_else(|| anyhow!("no beds/baths tag"))?
        .text())
}

static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"((\d,)?\d+)\sft").unwrap());
static BEDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\+? bed").unwrap());
static BATHS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)(\.5)? bath").unwrap());

fn get_size(page: &Document) -> anyhow::Result<FieldValue> {
    let text = beds_baths_text(page)?;
    Ok(SIZE_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|size| clean_number(size.as_str()))
        .unwrap_or(FieldValue::Missing))
}

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[12][890]\d\d").unwrap());

fn get_year_built(page: &Document) -> anyhow::Result<FieldValue> {
    let section = page
        .find(
            Name("div")
                .and(Class("lst_info"))
                .and(Class("section"))
                .and(Class("building_info")),
        )
        .next()
        .ok_or_else(|| anyhow!("no building info section"))?;
    for li in section.find(Name("li")) {
        let text = li.text();
        if text.trim_start().starts_with("Built in") {
            if let Some(year) = YEAR_RE.find(&text) {
                return Ok(clean_number(year.as_str()));
            }
        }
    }
    Ok(FieldValue::Missing)
}

fn get_bedrooms(page: &Document) -> anyhow::Result<FieldValue> {
    let text = beds_baths_text(page)?;
    Ok(BEDS_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|beds| clean_number(beds.as_str()))
        .unwrap_or(FieldValue::Missing))
}

fn get_bathrooms(page: &Document) -> anyhow::Result<FieldValue> {
    let text = beds_baths_text(page)?;
    Ok(BATHS_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|baths| clean_number(baths.as_str()))
        .unwrap_or(FieldValue::Missing))
}

fn get_half_bathrooms(page: &Document) -> anyhow::Result<FieldValue> {
    let text = beds_baths_text(page)?;
    let half = BATHS_RE
        .captures(&text)
        .and_then(|caps| caps.get(2))
        .is_some();
    if half {
        Ok(FieldValue::Integer(1))
    } else {
        Ok(FieldValue::Missing)
    }
}

fn get_representative(page: &Document) -> anyhow::Result<FieldValue> {
    let name = page
        .find(Name("div").and(Class("contact-wrapper")))
        .next()
        .and_then(|contact| contact.find(Name("span").and(Class("name"))).next());
    Ok(name
        .map(|n| FieldValue::Text(n.text().trim().to_string()))
        .unwrap_or(FieldValue::Missing))
}

fn get_agency(page: &Document) -> anyhow::Result<FieldValue> {
    let href = page
        .find(Name("a").and(Class("website_link")))
        .next()
        .and_then(|a| a.attr("href").map(str::to_string))
        .ok_or_else(|| anyhow!("no agency link"))?;
    let host = Url::parse(&href)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| anyhow!("unparsable agency url {href:?}"))?;
    Ok(FieldValue::Text(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_increments_the_page_number() {
        assert_eq!(
            next_page("https://www.cityrealty.com/search-results#?page=1"),
            Some("https://www.cityrealty.com/search-results#?page=2".to_string())
        );
        assert_eq!(next_page("https://www.cityrealty.com/about"), None);
    }

    #[test]
    fn listings_are_collected_from_index_pages() {
        let page = Document::from(
            r#"<html><body>
                <span class="lst_name"><a href="/apartments/123-main">x</a></span>
                <span class="lst_name"><a href="/apartments/456-oak">y</a></span>
                <span class="other"><a href="/nope">n</a></span>
            </body></html>"#,
        );
        assert_eq!(
            CityRealty.parsable_links(&page),
            vec!["/apartments/123-main", "/apartments/456-oak"]
        );
    }

    #[test]
    fn hidden_next_arrow_stops_traversal() {
        let last = Document::from(r#"<ul><li class="next ng-hide">next</li></ul>"#);
        let more = Document::from(r#"<ul><li class="next">next</li></ul>"#);
        assert!(CityRealty.stop_test(&last));
        assert!(!CityRealty.stop_test(&more));
    }

    #[test]
    fn detail_fields_are_extracted() {
        let page = Document::from(
            r#"<html><body>
                <h1 class="bld_title">350 West 42nd Street #4B</h1>
                <span class="price">$3,450</span>
                <span class="beds_baths">2 beds, 1.5 baths, 850 ft</span>
                <div class="wysiwyg">Bright corner unit.</div>
                <div class="amenities section"><ul><li>Elevator</li><li>Laundry</li></ul></div>
                <a class="website_link" href="https://www.agency.example.com/home">site</a>
            </body></html>"#,
        );
        let record = CityRealty.page_parser().parse(&page);

        assert_eq!(
            *record.get("address"),
            FieldValue::Text("350 West 42nd Street #4B".into())
        );
        assert_eq!(*record.get("price"), FieldValue::Number(3450.0));
        assert_eq!(*record.get("bedrooms"), FieldValue::Number(2.0));
        assert_eq!(*record.get("bathrooms"), FieldValue::Number(1.0));
        assert_eq!(*record.get("half_bathrooms"), FieldValue::Integer(1));
        assert_eq!(*record.get("size"), FieldValue::Number(850.0));
        assert_eq!(
            *record.get("amenities"),
            FieldValue::Text("Elevator, Laundry".into())
        );
        assert_eq!(
            *record.get("agency"),
            FieldValue::Text("www.agency.example.com".into())
        );
        // absent on this page: isolated to the missing sentinel
        assert_eq!(*record.get("neighborhood"), FieldValue::Missing);
    }
}
