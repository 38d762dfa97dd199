//! Stop conditions evaluated after every page.

use std::fmt;

use url::Url;

use crate::scrapers::TimelinePage;

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page has no "load more" affordance.
    NoShowMore,
    /// The affordance carries no usable link.
    NoLink,
    /// The link points back at the profile root.
    SelfReferential,
    /// Enough items collected.
    TargetReached,
    /// The link repeats the cursor that produced this page.
    RepeatedCursor,
    /// The page had no items although more were advertised.
    EmptyPage,
    /// The configured page budget is used up.
    PageBudget,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoShowMore => "no-show-more-div",
            Self::NoLink => "no-show-more-link",
            Self::SelfReferential => "self-referential-link",
            Self::TargetReached => "target-reached",
            Self::RepeatedCursor => "repeated-cursor",
            Self::EmptyPage => "empty-page",
            Self::PageBudget => "page-budget",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decide whether to stop after `page`.
///
/// `previous_cursor` is the cursor that was used to load `page`.
pub fn should_stop(
    page: &TimelinePage,
    username: &str,
    previous_cursor: Option<&str>,
    collected: usize,
    requested: usize,
) -> Option<StopReason> {
    if !page.has_more {
        return Some(StopReason::NoShowMore);
    }
    let link = match page.continuation.as_deref().map(str::trim) {
        Some(link) if !link.is_empty() => link,
        _ => return Some(StopReason::NoLink),
    };
    let Some(resolved) = resolve(link) else {
        return Some(StopReason::NoLink);
    };
    if is_profile_root(&resolved, username) {
        return Some(StopReason::SelfReferential);
    }
    if collected >= requested {
        return Some(StopReason::TargetReached);
    }
    if previous_cursor.and_then(resolve).as_ref() == Some(&resolved) {
        return Some(StopReason::RepeatedCursor);
    }
    if page.items.is_empty() {
        return Some(StopReason::EmptyPage);
    }
    None
}

fn resolve(link: &str) -> Option<Url> {
    Url::parse("http://mirror.invalid/").ok()?.join(link).ok()
}

/// A link is the profile root when its path is `/<username>` (ignoring case
/// and a trailing slash) and it carries no non-empty `cursor` parameter.
fn is_profile_root(link: &Url, username: &str) -> bool {
    let path = link.path().trim_end_matches('/');
    let root = path
        .strip_prefix('/')
        .is_some_and(|rest| rest.eq_ignore_ascii_case(username));
    let has_cursor = link
        .query_pairs()
        .any(|(key, value)| key == "cursor" && !value.is_empty());
    root && !has_cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::TimelineItem;

    fn page(has_more: bool, link: Option<&str>, items: usize) -> TimelinePage {
        TimelinePage {
            has_more,
            continuation: link.map(str::to_string),
            items: vec![TimelineItem::default(); items],
            ..Default::default()
        }
    }

    #[test]
    fn test_stop_when_no_show_more() {
        let p = page(false, None, 10);
        assert_eq!(
            should_stop(&p, "testuser", None, 50, 100),
            Some(StopReason::NoShowMore)
        );
    }

    #[test]
    fn test_stop_when_show_more_has_no_link() {
        let p = page(true, None, 10);
        assert_eq!(
            should_stop(&p, "testuser", None, 50, 100),
            Some(StopReason::NoLink)
        );
        let blank = page(true, Some("  "), 10);
        assert_eq!(
            should_stop(&blank, "testuser", None, 50, 100),
            Some(StopReason::NoLink)
        );
    }

    #[test]
    fn test_stop_when_link_points_to_profile() {
        for link in [
            "/testuser",
            "/testuser/",
            "/TestUser",
            "/testuser?cursor=",
            "https://nitter.example/testuser",
        ] {
            let p = page(true, Some(link), 10);
            assert_eq!(
                should_stop(&p, "testuser", None, 50, 100),
                Some(StopReason::SelfReferential),
                "link {}",
                link
            );
        }
    }

    #[test]
    fn test_continue_with_cursor_link() {
        let p = page(true, Some("/testuser?cursor=abc123"), 20);
        assert_eq!(should_stop(&p, "testuser", None, 50, 100), None);
    }

    #[test]
    fn test_other_paths_are_not_self_referential() {
        let p = page(true, Some("/testuser/with_replies"), 20);
        assert_eq!(should_stop(&p, "testuser", None, 50, 100), None);
        let p = page(true, Some("/testuser2"), 20);
        assert_eq!(should_stop(&p, "testuser", None, 50, 100), None);
    }

    #[test]
    fn test_stop_when_target_reached() {
        let p = page(true, Some("/testuser?cursor=abc123"), 20);
        assert_eq!(
            should_stop(&p, "testuser", None, 100, 100),
            Some(StopReason::TargetReached)
        );
    }

    #[test]
    fn test_stop_on_repeated_cursor() {
        let p = page(true, Some("/testuser?cursor=abc123"), 20);
        assert_eq!(
            should_stop(&p, "testuser", Some("/testuser?cursor=abc123"), 40, 100),
            Some(StopReason::RepeatedCursor)
        );
        assert_eq!(
            should_stop(&p, "testuser", Some("/testuser?cursor=zzz"), 40, 100),
            None
        );
    }

    #[test]
    fn test_stop_on_empty_page() {
        let p = page(true, Some("/testuser?cursor=abc123"), 0);
        assert_eq!(
            should_stop(&p, "testuser", None, 40, 100),
            Some(StopReason::EmptyPage)
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(StopReason::NoShowMore.to_string(), "no-show-more-div");
        assert_eq!(StopReason::PageBudget.label(), "page-budget");
    }
}
