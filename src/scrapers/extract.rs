//! Timeline extraction from rendered mirror pages.
//!
//! Works on generic structural conventions shared by the mirror front-ends:
//! a profile card, a `.timeline` of `.timeline-item`s and a trailing
//! `.show-more` affordance carrying the continuation link.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::types::{
    Author, ItemKind, ItemMetrics, Profile, ProfileStats, TimelineItem, TimelinePage,
    Verification,
};
use crate::error::ScrapeError;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {}: {:?}", css, e))
}

static ERROR_PANEL: LazyLock<Selector> = LazyLock::new(|| selector(".error-panel"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static TIMELINE: LazyLock<Selector> = LazyLock::new(|| selector(".timeline"));
static ITEM: LazyLock<Selector> =
    LazyLock::new(|| selector(".timeline .timeline-item:not(.show-more)"));
static SHOW_MORE: LazyLock<Selector> = LazyLock::new(|| selector(".show-more"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));

static PROFILE_CARD: LazyLock<Selector> = LazyLock::new(|| selector(".profile-card"));
static PROFILE_NAME: LazyLock<Selector> = LazyLock::new(|| selector(".profile-card-fullname"));
static PROFILE_USERNAME: LazyLock<Selector> =
    LazyLock::new(|| selector(".profile-card-username"));
static PROFILE_BIO: LazyLock<Selector> = LazyLock::new(|| selector(".profile-bio"));
static PROFILE_AVATAR: LazyLock<Selector> = LazyLock::new(|| selector(".profile-card-avatar"));
static PROFILE_BANNER: LazyLock<Selector> = LazyLock::new(|| selector(".profile-banner img"));
static PROFILE_JOINED: LazyLock<Selector> = LazyLock::new(|| selector(".profile-joindate span"));
static VERIFIED: LazyLock<Selector> = LazyLock::new(|| selector(".verified-icon"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));

static STAT_POSTS: LazyLock<Selector> =
    LazyLock::new(|| selector(".profile-statlist .posts .profile-stat-num"));
static STAT_FOLLOWING: LazyLock<Selector> =
    LazyLock::new(|| selector(".profile-statlist .following .profile-stat-num"));
static STAT_FOLLOWERS: LazyLock<Selector> =
    LazyLock::new(|| selector(".profile-statlist .followers .profile-stat-num"));
static STAT_LIKES: LazyLock<Selector> =
    LazyLock::new(|| selector(".profile-statlist .likes .profile-stat-num"));

static TWEET_LINK: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-link"));
static TWEET_NAME: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-header .fullname"));
static TWEET_USERNAME: LazyLock<Selector> =
    LazyLock::new(|| selector(".tweet-header .username"));
static TWEET_AVATAR: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-header .avatar"));
static TWEET_CONTENT: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-content"));
static TWEET_DATE: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-date a"));
static TWEET_STAT: LazyLock<Selector> = LazyLock::new(|| selector(".tweet-stats .tweet-stat"));
static RETWEET_HEADER: LazyLock<Selector> = LazyLock::new(|| selector(".retweet-header"));
static QUOTE: LazyLock<Selector> = LazyLock::new(|| selector(".quote"));

/// Counter slot for a `.tweet-stat`, picked by its icon class.
fn stat_slot<'a>(metrics: &'a mut ItemMetrics, stat_html: &str) -> Option<&'a mut u64> {
    if stat_html.contains("icon-comment") {
        Some(&mut metrics.comments)
    } else if stat_html.contains("icon-retweet") {
        Some(&mut metrics.retweets)
    } else if stat_html.contains("icon-quote") {
        Some(&mut metrics.quotes)
    } else if stat_html.contains("icon-heart") {
        Some(&mut metrics.likes)
    } else if stat_html.contains("icon-views") || stat_html.contains("icon-play") {
        Some(&mut metrics.views)
    } else {
        None
    }
}

/// Parse one rendered profile or continuation page.
pub fn parse_timeline(html: &str, page_url: &str) -> Result<TimelinePage, ScrapeError> {
    let base = Url::parse(page_url)
        .map_err(|e| ScrapeError::navigation(page_url, format!("Invalid URL: {}", e)))?;
    let doc = Html::parse_document(html);

    check_error_page(&doc, &base)?;

    let profile = parse_profile(&doc, &base);
    let has_timeline = doc.select(&TIMELINE).next().is_some();
    if profile.is_none() && !has_timeline {
        return Err(ScrapeError::parsing(
            ".timeline",
            format!("no timeline or profile card on {}", page_url),
        ));
    }

    let stats = profile.as_ref().map(|_| parse_stats(&doc));
    let items = doc
        .select(&ITEM)
        .map(|el| parse_item(el, &base))
        .collect();

    let show_more = doc.select(&SHOW_MORE).last();
    let continuation = show_more
        .and_then(|el| el.select(&LINK).next())
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| portable_link(&base, href));

    Ok(TimelinePage {
        profile,
        stats,
        items,
        has_more: show_more.is_some(),
        continuation,
    })
}

fn check_error_page(doc: &Html, base: &Url) -> Result<(), ScrapeError> {
    let panel = doc
        .select(&ERROR_PANEL)
        .next()
        .map(|el| text_of(el).to_lowercase());
    let title = doc
        .select(&TITLE)
        .next()
        .map(|el| text_of(el).to_lowercase())
        .unwrap_or_default();

    let mentions = |needle: &str| {
        panel.as_deref().is_some_and(|p| p.contains(needle)) || title.contains(needle)
    };

    if mentions("rate limit") || mentions("too many requests") {
        return Err(ScrapeError::RateLimited {
            instance: base.origin().ascii_serialization(),
            retry_after: None,
        });
    }

    if mentions("not found") || mentions("doesn't exist") || mentions("does not exist") {
        let username = base
            .path_segments()
            .and_then(|mut s| s.next())
            .unwrap_or_default()
            .to_string();
        return Err(ScrapeError::NotFound { username });
    }

    Ok(())
}

fn parse_profile(doc: &Html, base: &Url) -> Option<Profile> {
    let card = doc.select(&PROFILE_CARD).next()?;

    let username = first_text(card, &PROFILE_USERNAME)
        .map(|u| u.trim_start_matches('@').to_string())
        .unwrap_or_default();
    let name = card
        .select(&PROFILE_NAME)
        .next()
        .map(|el| {
            el.value()
                .attr("title")
                .map(str::to_string)
                .unwrap_or_else(|| text_of(el))
        })
        .unwrap_or_default();

    let profile_photo_url = card.select(&PROFILE_AVATAR).next().and_then(|el| {
        el.value()
            .attr("href")
            .or_else(|| el.select(&IMG).next().and_then(|img| img.value().attr("src")))
            .and_then(|src| absolute(base, src))
    });
    let cover_photo_url = doc
        .select(&PROFILE_BANNER)
        .next()
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| absolute(base, src));
    let registration_date = card.select(&PROFILE_JOINED).next().map(|el| {
        el.value()
            .attr("title")
            .map(str::to_string)
            .unwrap_or_else(|| text_of(el))
    });
    let verification = card
        .select(&PROFILE_NAME)
        .next()
        .and_then(|name| name.select(&VERIFIED).next())
        .map(verification_of);

    Some(Profile {
        profile_link: format!("https://x.com/{}", username),
        username,
        name,
        bio: first_text(card, &PROFILE_BIO).filter(|b| !b.is_empty()),
        profile_photo_url,
        cover_photo_url,
        registration_date,
        verification,
    })
}

fn parse_stats(doc: &Html) -> ProfileStats {
    let stat = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|el| parse_count(&text_of(el)))
            .unwrap_or(0)
    };
    ProfileStats {
        tweets: stat(&*STAT_POSTS),
        following: stat(&*STAT_FOLLOWING),
        followers: stat(&*STAT_FOLLOWERS),
        likes: stat(&*STAT_LIKES),
    }
}

fn parse_item(item: ElementRef<'_>, base: &Url) -> TimelineItem {
    let author = Author {
        username: first_text(item, &TWEET_USERNAME)
            .map(|u| u.trim_start_matches('@').to_string())
            .unwrap_or_default(),
        name: item
            .select(&TWEET_NAME)
            .next()
            .map(|el| {
                el.value()
                    .attr("title")
                    .map(str::to_string)
                    .unwrap_or_else(|| text_of(el))
            })
            .unwrap_or_default(),
        profile_photo_url: item
            .select(&TWEET_AVATAR)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| absolute(base, src)),
        verification: item
            .select(&TWEET_NAME)
            .next()
            .and_then(|name| name.select(&VERIFIED).next())
            .map(verification_of),
    };

    let mut metrics = ItemMetrics::default();
    for stat in item.select(&TWEET_STAT) {
        if let Some(slot) = stat_slot(&mut metrics, &stat.html()) {
            *slot = parse_count(&text_of(stat));
        }
    }

    let kind = if item.select(&RETWEET_HEADER).next().is_some() {
        ItemKind::Retweet
    } else if item.select(&QUOTE).next().is_some() {
        ItemKind::Quote
    } else {
        ItemKind::Tweet
    };

    TimelineItem {
        author,
        content: first_text(item, &TWEET_CONTENT).unwrap_or_default(),
        url: item
            .select(&TWEET_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| absolute(base, href)),
        created_at: item
            .select(&TWEET_DATE)
            .next()
            .and_then(|a| a.value().attr("title"))
            .map(str::to_string),
        metrics,
        kind,
    }
}

fn verification_of(icon: ElementRef<'_>) -> Verification {
    if icon.value().has_class(
        "business",
        scraper::CaseSensitivity::AsciiCaseInsensitive,
    ) {
        Verification::Business
    } else {
        Verification::Blue
    }
}

/// Reduce a link to path and query so it works against any mirror.
fn portable_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href == "#" {
        return None;
    }
    let resolved = base.join(href).ok()?;
    Some(match resolved.query() {
        Some(q) => format!("{}?{}", resolved.path(), q),
        None => resolved.path().to_string(),
    })
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).next().map(text_of)
}

/// Parse counters such as `1,234`, `12.5K` or `3M`.
pub fn parse_count(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let (number, multiplier) = match cleaned.chars().last() {
        Some('K') | Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M') | Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('B') | Some('b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    number
        .parse::<f64>()
        .map(|n| (n * multiplier).round() as u64)
        .unwrap_or(0)
}
