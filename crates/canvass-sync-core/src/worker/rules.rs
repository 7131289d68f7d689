//! Route classification for intercepted requests.
//!
//! Rules are evaluated in order and the first match wins. API listings
//! must be claimed before the generic `/api/` pass-through, and both
//! before static-asset and HTML handling.

use regex::RegexSet;
use reqwest::Method;

use super::http::FetchRequest;
use crate::config::CacheSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// Which named cache a handled route reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Static,
    Dynamic,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; the request goes to the network untouched.
    PassThrough,
    Handle { strategy: Strategy, cache: CacheKind },
}

#[derive(Debug)]
enum Matcher {
    /// Anything other than a GET over http(s).
    NotInterceptable,
    ApiListing(RegexSet),
    PathPrefix(String),
    StaticAsset {
        prefixes: Vec<String>,
        extensions: Vec<String>,
    },
    HtmlNavigation,
    Any,
}

impl Matcher {
    fn matches(&self, req: &FetchRequest) -> bool {
        match self {
            Matcher::NotInterceptable => {
                req.method != Method::GET || !matches!(req.url.scheme(), "http" | "https")
            }
            Matcher::ApiListing(patterns) => patterns.is_match(&req.path_and_query()),
            Matcher::PathPrefix(prefix) => req.url.path().starts_with(prefix.as_str()),
            Matcher::StaticAsset {
                prefixes,
                extensions,
            } => {
                let path = req.url.path();
                if prefixes.iter().any(|p| path.starts_with(p.as_str())) {
                    return true;
                }
                let lower = path.to_ascii_lowercase();
                match lower.rsplit_once('.') {
                    Some((_, ext)) if !ext.contains('/') => extensions.iter().any(|e| e == ext),
                    _ => false,
                }
            }
            Matcher::HtmlNavigation => req.accepts_html(),
            Matcher::Any => true,
        }
    }
}

#[derive(Debug)]
pub struct RouteRule {
    name: &'static str,
    matcher: Matcher,
    route: Route,
}

impl RouteRule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

#[derive(Debug)]
pub struct RequestInterceptor {
    rules: Vec<RouteRule>,
}

impl RequestInterceptor {
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, regex::Error> {
        let api_patterns = RegexSet::new(&settings.api_patterns)?;
        let extensions = settings
            .image_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let rules = vec![
            RouteRule {
                name: "not-interceptable",
                matcher: Matcher::NotInterceptable,
                route: Route::PassThrough,
            },
            RouteRule {
                name: "api-listing",
                matcher: Matcher::ApiListing(api_patterns),
                route: Route::Handle {
                    strategy: Strategy::NetworkFirst,
                    cache: CacheKind::Api,
                },
            },
            RouteRule {
                name: "api-other",
                matcher: Matcher::PathPrefix("/api/".to_string()),
                route: Route::PassThrough,
            },
            RouteRule {
                name: "static-asset",
                matcher: Matcher::StaticAsset {
                    prefixes: settings.static_prefixes.clone(),
                    extensions,
                },
                route: Route::Handle {
                    strategy: Strategy::CacheFirst,
                    cache: CacheKind::Static,
                },
            },
            RouteRule {
                name: "html-navigation",
                matcher: Matcher::HtmlNavigation,
                route: Route::Handle {
                    strategy: Strategy::NetworkFirst,
                    cache: CacheKind::Dynamic,
                },
            },
            RouteRule {
                name: "catch-all",
                matcher: Matcher::Any,
                route: Route::Handle {
                    strategy: Strategy::StaleWhileRevalidate,
                    cache: CacheKind::Dynamic,
                },
            },
        ];
        Ok(Self { rules })
    }

    pub fn classify(&self, req: &FetchRequest) -> Route {
        self.matching_rule(req)
            .map(RouteRule::route)
            .unwrap_or(Route::PassThrough)
    }

    pub fn matching_rule(&self, req: &FetchRequest) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(req))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}
