//! Raw listing -> record candidate. Everything here is deterministic given the
//! listing and the [`TransformContext`].

use std::sync::OnceLock;

use catsync_core::{
    EventSchedule, Price, Provenance, RawListing, RawPrice, RecordCandidate, SyncFlavor,
};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::RuleTable;

/// Provider's "no price" marker. Any non-positive value is treated the same way.
pub const PRICE_UNAVAILABLE_SENTINEL: f64 = -1.0;

/// Largest value a `NUMERIC(2, 1)` rating column holds.
pub const RATING_MAX: f64 = 9.9;

pub const DEFAULT_AFFILIATE_TEMPLATE: &str = "https://platinumlist.net/aff/?ref={partner}&link={url}";

const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&#160;", " "),
    ("&lt;", "<"),
    ("&#60;", "<"),
    ("&gt;", ">"),
    ("&#62;", ">"),
    ("&quot;", "\""),
    ("&#34;", "\""),
    ("&#39;", "'"),
    ("&#039;", "'"),
    ("&apos;", "'"),
    // last, so "&amp;lt;" decodes once to "&lt;"
    ("&amp;", "&"),
    ("&#38;", "&"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("listing {external_id} has no title")]
    MissingTitle { external_id: String },
    #[error("event listing {external_id} has no start time")]
    MissingStart { external_id: String },
    #[error("listing {external_id} has out-of-range timestamp {value}")]
    InvalidTimestamp { external_id: String, value: i64 },
}

/// Maps a raw provider price to a canonical one. Non-positive, non-finite or
/// currency-less prices become `None`; the sentinel never survives.
pub fn normalize_price(raw: Option<&RawPrice>) -> Option<Price> {
    let raw = raw?;
    let amount = raw
        .value
        .filter(|v| v.is_finite())
        .map(|v| (v * 100.0).round() / 100.0)
        .filter(|v| *v > 0.0)?;
    let currency = raw
        .currency
        .as_deref()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())?;
    Some(Price { amount, currency })
}

/// One decimal place, then clamped into `[0, RATING_MAX]`.
pub fn clamp_rating(raw: Option<f64>) -> Option<f64> {
    let value = raw.filter(|v| v.is_finite())?;
    let rounded = (value * 10.0).round() / 10.0;
    Some(rounded.clamp(0.0, RATING_MAX))
}

/// Lower-case ASCII title with runs of anything else collapsed to `-`, then
/// `-{external_id}`. The id suffix never contains `-`, so the last dash is
/// always the title/id boundary.
pub fn slugify(title: &str, external_id: &str) -> String {
    let mut base = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            base.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            base.push('-');
            last_dash = true;
        }
    }
    let base = base.trim_matches('-');
    let suffix = urlencoding::encode(external_id.trim()).replace('-', "%2D");
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

fn markup_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("static tag pattern compiles"))
}

pub fn decode_entities(text: &str) -> String {
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}

/// Strips tags, decodes the entities the provider emits, collapses whitespace.
/// Blank results become `None`.
pub fn clean_description(raw: Option<&str>) -> Option<String> {
    let stripped = markup_tag().replace_all(raw?, " ");
    let decoded = decode_entities(&stripped);
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Wraps `target` in the partner redirect template. Falls back to `target`
/// when there is no partner or the template has no `{url}` slot.
pub fn affiliate_url(template: &str, partner: Option<&str>, target: &str) -> String {
    let partner = partner.map(str::trim).filter(|p| !p.is_empty());
    match partner {
        Some(partner) if template.contains("{url}") => template
            .replace("{partner}", &urlencoding::encode(partner))
            .replace("{url}", &urlencoding::encode(target)),
        _ => target.to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

fn instant(external_id: &str, value: i64) -> Result<DateTime<Utc>, TransformError> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| TransformError::InvalidTimestamp {
            external_id: external_id.to_string(),
            value,
        })
}

/// Calendar date + wall-clock time of `start`/`end` in `tz`.
pub fn local_schedule(
    external_id: &str,
    start: i64,
    end: Option<i64>,
    tz: Tz,
) -> Result<EventSchedule, TransformError> {
    let starts_at = instant(external_id, start)?;
    let local_start = starts_at.with_timezone(&tz);
    let local_end = end
        .map(|e| instant(external_id, e))
        .transpose()?
        .map(|e| e.with_timezone(&tz));
    Ok(EventSchedule {
        timezone: tz.name().to_string(),
        starts_at,
        start_date: local_start.date_naive(),
        start_time: local_start.time(),
        end_date: local_end.map(|e| e.date_naive()),
        end_time: local_end.map(|e| e.time()),
    })
}

#[derive(Debug, Clone)]
pub struct TransformContext {
    pub source: String,
    pub flavor: SyncFlavor,
    pub rules: RuleTable,
    pub affiliate_template: String,
    pub partner_ref: Option<String>,
    pub default_timezone: Tz,
}

impl TransformContext {
    pub fn new(source: impl Into<String>, flavor: SyncFlavor) -> Self {
        Self {
            source: source.into(),
            flavor,
            rules: RuleTable::for_flavor(flavor),
            affiliate_template: DEFAULT_AFFILIATE_TEMPLATE.to_string(),
            partner_ref: None,
            default_timezone: chrono_tz::Asia::Dubai,
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_affiliate(mut self, template: impl Into<String>, partner_ref: Option<String>) -> Self {
        self.affiliate_template = template.into();
        self.partner_ref = partner_ref;
        self
    }

    pub fn with_default_timezone(mut self, tz: Tz) -> Self {
        self.default_timezone = tz;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Transformer {
    ctx: TransformContext,
}

impl Transformer {
    pub fn new(ctx: TransformContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TransformContext {
        &self.ctx
    }

    pub fn transform(&self, listing: &RawListing) -> Result<RecordCandidate, TransformError> {
        let external_id = listing.id.as_str();
        let title = non_blank(listing.name.as_deref()).ok_or_else(|| TransformError::MissingTitle {
            external_id: external_id.to_string(),
        })?;
        let description = clean_description(listing.description.as_deref());
        let category = self
            .ctx
            .rules
            .classify(&title, description.as_deref())
            .to_string();

        let mut gallery: Vec<String> = Vec::with_capacity(listing.images.len());
        for image in listing.images.iter().filter_map(|i| non_blank(Some(i.as_str()))) {
            if !gallery.contains(&image) {
                gallery.push(image);
            }
        }

        let booking_url =
            non_blank(listing.booking_url.as_deref()).or_else(|| non_blank(listing.url.as_deref()));
        let affiliate_url = booking_url.as_deref().map(|target| {
            affiliate_url(
                &self.ctx.affiliate_template,
                self.ctx.partner_ref.as_deref(),
                target,
            )
        });

        let schedule = match self.ctx.flavor {
            SyncFlavor::Events => {
                let start = listing.start.ok_or_else(|| TransformError::MissingStart {
                    external_id: external_id.to_string(),
                })?;
                let tz = self.resolve_timezone(listing);
                Some(local_schedule(external_id, start, listing.end, tz)?)
            }
            SyncFlavor::Attractions => None,
        };

        Ok(RecordCandidate {
            provenance: Provenance::new(self.ctx.source.clone(), external_id),
            slug: slugify(&title, external_id),
            title,
            description,
            category,
            price: normalize_price(listing.price.as_ref()),
            rating: clamp_rating(listing.rating),
            image_url: gallery.first().cloned(),
            gallery,
            booking_url,
            affiliate_url,
            venue: non_blank(listing.venue.as_deref()),
            schedule,
        })
    }

    fn resolve_timezone(&self, listing: &RawListing) -> Tz {
        match listing.timezone.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.parse::<Tz>().unwrap_or_else(|_| {
                warn!(
                    external_id = %listing.id,
                    timezone = name,
                    fallback = self.ctx.default_timezone.name(),
                    "unknown listing timezone; using default"
                );
                self.ctx.default_timezone
            }),
            _ => self.ctx.default_timezone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn attraction(id: &str, title: &str) -> RawListing {
        let mut l = RawListing::new(id, title);
        l.is_attraction = true;
        l
    }

    fn attractions() -> Transformer {
        Transformer::new(
            TransformContext::new("platinumlist", SyncFlavor::Attractions)
                .with_affiliate(DEFAULT_AFFILIATE_TEMPLATE, Some("partner-7".into())),
        )
    }

    fn events() -> Transformer {
        Transformer::new(TransformContext::new("platinumlist", SyncFlavor::Events))
    }

    #[test]
    fn pearl_diving_scenario() {
        let mut raw = attraction("42", "Pearl Diving Tour!!");
        raw.price = Some(RawPrice {
            value: Some(-1.0),
            currency: Some("AED".into()),
        });
        raw.rating = Some(9.97);

        let candidate = attractions().transform(&raw).unwrap();
        assert_eq!(candidate.price, None);
        assert_eq!(candidate.rating, Some(9.9));
        assert_eq!(candidate.slug, "pearl-diving-tour-42");
        assert_eq!(candidate.provenance, Provenance::new("platinumlist", "42"));
        assert_eq!(candidate.category, "water-sports");
        assert!(candidate.schedule.is_none());
    }

    #[test]
    fn non_positive_prices_are_null() {
        for value in [PRICE_UNAVAILABLE_SENTINEL, 0.0, -0.0, -250.0, 0.004, f64::NAN, f64::NEG_INFINITY] {
            let raw = RawPrice {
                value: Some(value),
                currency: Some("AED".into()),
            };
            assert_eq!(normalize_price(Some(&raw)), None, "value {value}");
        }
        assert_eq!(normalize_price(None), None);

        let priced = RawPrice {
            value: Some(95.555),
            currency: Some(" aed ".into()),
        };
        assert_eq!(
            normalize_price(Some(&priced)),
            Some(Price {
                amount: 95.56,
                currency: "AED".into()
            })
        );

        let no_currency = RawPrice {
            value: Some(10.0),
            currency: None,
        };
        assert_eq!(normalize_price(Some(&no_currency)), None);
    }

    #[test]
    fn ratings_are_rounded_then_clamped() {
        assert_eq!(clamp_rating(Some(9.97)), Some(9.9));
        assert_eq!(clamp_rating(Some(9.9)), Some(9.9));
        assert_eq!(clamp_rating(Some(12.0)), Some(9.9));
        assert_eq!(clamp_rating(Some(4.25)), Some(4.3));
        assert_eq!(clamp_rating(Some(4.749_999)), Some(4.7));
        assert_eq!(clamp_rating(Some(-3.2)), Some(0.0));
        assert_eq!(clamp_rating(Some(f64::NAN)), None);
        assert_eq!(clamp_rating(None), None);

        for raw in [0.0, 0.04, 1.23456, 5.55, 8.96, 9.94, 9.95, 10.0, 1e9] {
            let stored = clamp_rating(Some(raw)).unwrap();
            assert!((0.0..=RATING_MAX).contains(&stored), "{raw} -> {stored}");
            let tenths = stored * 10.0;
            assert!((tenths - tenths.round()).abs() < 1e-9, "{raw} -> {stored}");
        }
    }

    #[test]
    fn slugs_are_deterministic_and_id_scoped() {
        assert_eq!(slugify("Pearl Diving Tour!!", "42"), "pearl-diving-tour-42");
        assert_eq!(slugify("  --Café  Nights-- ", "7"), "caf-nights-7");
        assert_eq!(slugify("!!!", "9"), "9");
        assert_eq!(slugify("Same", "a b"), "same-a%20b");
        assert_eq!(slugify("Show", "12"), slugify("Show", "12"));
        assert_ne!(slugify("Show", "12"), slugify("Show", "13"));
        assert_ne!(slugify("Show", "a-b"), slugify("Show", "a b"));
        assert_eq!(slugify("Gig", "ev-300"), "gig-ev%2D300");
        assert_ne!(slugify("Gig ev", "300"), slugify("Gig", "ev-300"));
    }

    #[test]
    fn descriptions_are_cleaned() {
        assert_eq!(
            clean_description(Some("<p>Dive for pearls &amp; learn the <b>history</b>.</p>")),
            Some("Dive for pearls & learn the history .".to_string())
        );
        assert_eq!(
            clean_description(Some("A family&nbsp;afternoon\n\n  of &quot;fun&quot; &#039;n&#39; games")),
            Some("A family afternoon of \"fun\" 'n' games".to_string())
        );
        assert_eq!(
            clean_description(Some("&amp;lt;not a tag&amp;gt;")),
            Some("&lt;not a tag&gt;".to_string())
        );
        assert_eq!(clean_description(Some("<br/> &nbsp; <p></p>")), None);
        assert_eq!(clean_description(None), None);
    }

    #[test]
    fn affiliate_links_wrap_booking_url() {
        assert_eq!(
            affiliate_url(
                DEFAULT_AFFILIATE_TEMPLATE,
                Some("partner 7"),
                "https://dubai.platinumlist.net/e/1?x=1&y=2"
            ),
            "https://platinumlist.net/aff/?ref=partner%207&link=https%3A%2F%2Fdubai.platinumlist.net%2Fe%2F1%3Fx%3D1%26y%3D2"
        );
        assert_eq!(affiliate_url(DEFAULT_AFFILIATE_TEMPLATE, None, "https://a.test/x"), "https://a.test/x");
        assert_eq!(affiliate_url(DEFAULT_AFFILIATE_TEMPLATE, Some("  "), "https://a.test/x"), "https://a.test/x");
        assert_eq!(affiliate_url("https://aff.test/static", Some("p"), "https://a.test/x"), "https://a.test/x");
    }

    #[test]
    fn booking_url_falls_back_to_listing_url() {
        let mut raw = attraction("5", "Dhow Cruise");
        raw.url = Some("https://dubai.platinumlist.net/a/5".into());
        let candidate = attractions().transform(&raw).unwrap();
        assert_eq!(candidate.booking_url.as_deref(), Some("https://dubai.platinumlist.net/a/5"));
        assert!(candidate
            .affiliate_url
            .as_deref()
            .unwrap()
            .starts_with("https://platinumlist.net/aff/?ref=partner-7&link=https%3A"));

        raw.booking_url = Some("https://book.test/5".into());
        let candidate = attractions().transform(&raw).unwrap();
        assert_eq!(candidate.booking_url.as_deref(), Some("https://book.test/5"));

        let bare = attractions().transform(&attraction("6", "Nothing")).unwrap();
        assert_eq!(bare.booking_url, None);
        assert_eq!(bare.affiliate_url, None);
    }

    #[test]
    fn media_fields_dedupe_and_pick_first_image() {
        let mut raw = attraction("8", "Aquarium");
        raw.images = vec![" ".into(), "https://cdn.test/a.jpg".into(), "https://cdn.test/a.jpg".into(), "https://cdn.test/b.jpg".into()];
        let candidate = attractions().transform(&raw).unwrap();
        assert_eq!(candidate.image_url.as_deref(), Some("https://cdn.test/a.jpg"));
        assert_eq!(candidate.gallery.len(), 2);
    }

    #[test]
    fn event_times_follow_the_listing_timezone() {
        let mut dubai = RawListing::new("1", "Concert");
        dubai.start = Some(1_700_000_000);
        dubai.end = Some(1_700_007_200);
        dubai.timezone = Some("Asia/Dubai".into());

        let mut london = dubai.clone();
        london.id = "2".into();
        london.timezone = Some("Europe/London".into());

        let d = events().transform(&dubai).unwrap().schedule.unwrap();
        let l = events().transform(&london).unwrap().schedule.unwrap();

        assert_eq!(d.starts_at, l.starts_at);
        assert_eq!(d.start_date, NaiveDate::from_ymd_opt(2023, 11, 15).unwrap());
        assert_eq!(d.start_time, NaiveTime::from_hms_opt(2, 13, 20).unwrap());
        assert_eq!(d.end_time, NaiveTime::from_hms_opt(4, 13, 20));
        assert_eq!(l.start_date, NaiveDate::from_ymd_opt(2023, 11, 14).unwrap());
        assert_eq!(l.start_time, NaiveTime::from_hms_opt(22, 13, 20).unwrap());
        assert_eq!(d.timezone, "Asia/Dubai");
        assert_eq!(l.timezone, "Europe/London");
    }

    #[test]
    fn missing_or_unknown_timezone_uses_context_default() {
        let mut raw = RawListing::new("3", "Concert");
        raw.start = Some(1_700_000_000);
        raw.timezone = Some("Mars/Olympus".into());
        let transformer = Transformer::new(
            TransformContext::new("platinumlist", SyncFlavor::Events)
                .with_default_timezone(chrono_tz::Europe::London),
        );
        let schedule = transformer.transform(&raw).unwrap().schedule.unwrap();
        assert_eq!(schedule.timezone, "Europe/London");

        raw.timezone = None;
        let schedule = events().transform(&raw).unwrap().schedule.unwrap();
        assert_eq!(schedule.timezone, "Asia/Dubai");
    }

    #[test]
    fn malformed_listings_are_errors() {
        let mut untitled = RawListing::new("10", "   ");
        untitled.start = Some(1_700_000_000);
        assert_eq!(
            events().transform(&untitled),
            Err(TransformError::MissingTitle {
                external_id: "10".into()
            })
        );

        let no_start = RawListing::new("11", "Gig");
        assert_eq!(
            events().transform(&no_start),
            Err(TransformError::MissingStart {
                external_id: "11".into()
            })
        );

        let mut far = RawListing::new("12", "Gig");
        far.start = Some(i64::MAX);
        assert!(matches!(
            events().transform(&far),
            Err(TransformError::InvalidTimestamp { .. })
        ));
    }
}
