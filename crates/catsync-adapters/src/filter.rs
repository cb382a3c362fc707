//! Per-listing membership test for a sync run.

use catsync_core::{RawListing, SyncFlavor};
use serde::Serialize;

const UNAVAILABLE_STATUSES: &[&str] = &[
    "sold_out",
    "soldout",
    "cancelled",
    "canceled",
    "unavailable",
    "closed",
    "expired",
];

/// Matches listings whose region-bearing fields mention one of the run's markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMatcher {
    markers: Vec<String>,
}

impl RegionMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// `"dubai, dxb"` -> two markers.
    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Listings with no region information never match.
    pub fn matches(&self, listing: &RawListing) -> bool {
        [listing.url.as_deref(), listing.city.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_ascii_lowercase)
            .any(|field| self.markers.iter().any(|m| field.contains(m.as_str())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

impl Availability {
    /// Missing status counts as available; only explicit sold-out/closed markers exclude.
    pub fn of(listing: &RawListing) -> Self {
        let Some(status) = listing.status.as_deref() else {
            return Availability::Available;
        };
        let normalized = status
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        if UNAVAILABLE_STATUSES.contains(&normalized.as_str()) {
            Availability::Unavailable
        } else {
            Availability::Available
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Region,
    Flavor,
    Unavailable,
}

/// All predicates must hold for a listing to belong to the run.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    flavor: SyncFlavor,
    region: RegionMatcher,
}

impl RecordFilter {
    pub fn new(flavor: SyncFlavor, region: RegionMatcher) -> Self {
        Self { flavor, region }
    }

    pub fn check(&self, listing: &RawListing) -> Result<(), Rejection> {
        if !self.region.matches(listing) {
            return Err(Rejection::Region);
        }
        if !flavor_accepts(self.flavor, listing) {
            return Err(Rejection::Flavor);
        }
        if Availability::of(listing) == Availability::Unavailable {
            return Err(Rejection::Unavailable);
        }
        Ok(())
    }

    pub fn accepts(&self, listing: &RawListing) -> bool {
        self.check(listing).is_ok()
    }
}

/// Attractions take only flagged listings, events only unflagged ones.
fn flavor_accepts(flavor: SyncFlavor, listing: &RawListing) -> bool {
    match flavor {
        SyncFlavor::Events => !listing.is_attraction,
        SyncFlavor::Attractions => listing.is_attraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, url: Option<&str>, is_attraction: bool, status: Option<&str>) -> RawListing {
        let mut l = RawListing::new(id, format!("Listing {id}"));
        l.url = url.map(ToString::to_string);
        l.is_attraction = is_attraction;
        l.status = status.map(ToString::to_string);
        l
    }

    fn dubai(flavor: SyncFlavor) -> RecordFilter {
        RecordFilter::new(flavor, RegionMatcher::from_csv("dubai"))
    }

    #[test]
    fn region_marker_matches_url_or_city() {
        let region = RegionMatcher::from_csv(" Dubai , dxb ");
        assert_eq!(region.markers(), ["dubai", "dxb"]);

        let by_url = listing("1", Some("https://DUBAI.platinumlist.net/x"), false, None);
        assert!(region.matches(&by_url));

        let mut by_city = listing("2", None, false, None);
        by_city.city = Some("DXB Marina".into());
        assert!(region.matches(&by_city));

        let elsewhere = listing("3", Some("https://abudhabi.platinumlist.net/x"), false, None);
        assert!(!region.matches(&elsewhere));
    }

    #[test]
    fn missing_region_is_excluded() {
        let filter = dubai(SyncFlavor::Events);
        let no_region = listing("1", None, false, None);
        assert_eq!(filter.check(&no_region), Err(Rejection::Region));

        let empty_markers = RecordFilter::new(SyncFlavor::Events, RegionMatcher::from_csv(" , "));
        let l = listing("2", Some("https://dubai.platinumlist.net/x"), false, None);
        assert!(!empty_markers.accepts(&l));
    }

    #[test]
    fn sold_out_and_cancelled_are_excluded() {
        let filter = dubai(SyncFlavor::Events);
        let url = Some("https://dubai.platinumlist.net/e");
        for status in ["sold_out", "Sold Out", "sold-out", "CANCELLED", "closed"] {
            let l = listing("1", url, false, Some(status));
            assert_eq!(filter.check(&l), Err(Rejection::Unavailable), "status {status}");
        }
        assert!(filter.accepts(&listing("2", url, false, Some("on_sale"))));
        assert!(filter.accepts(&listing("3", url, false, None)));
    }

    #[test]
    fn flavors_never_accept_the_same_listing() {
        let events = dubai(SyncFlavor::Events);
        let attractions = dubai(SyncFlavor::Attractions);
        let url = Some("https://dubai.platinumlist.net/x");
        let listings = vec![
            listing("1", url, true, None),
            listing("2", url, false, None),
            listing("3", url, true, Some("sold_out")),
            listing("4", None, false, None),
            listing("5", url, false, Some("on_sale")),
        ];
        for l in &listings {
            assert!(
                !(events.accepts(l) && attractions.accepts(l)),
                "listing {} accepted by both flavors",
                l.id
            );
        }
        assert!(attractions.accepts(&listings[0]));
        assert_eq!(events.check(&listings[0]), Err(Rejection::Flavor));
        assert!(events.accepts(&listings[1]));
    }
}
