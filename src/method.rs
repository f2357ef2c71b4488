//! HTTP request methods used for route registration and matching.

/// HTTP request methods accepted for route registration (§4.7).
///
/// `TRACE` and `CONNECT` are not represented; the transport's wire parser
/// (out of scope, §1) is expected to reject them before a request ever
/// reaches this crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl Method {
    /// Parses the lowercase or uppercase ASCII method name the transport
    /// reports from `getMethod()` (§6). Returns `None` for anything outside
    /// the accepted set.
    pub fn parse(src: &str) -> Option<Self> {
        match_ignore_ascii_case(src)
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
        }
    }
}

fn match_ignore_ascii_case(src: &str) -> Option<Method> {
    if src.eq_ignore_ascii_case("GET") {
        Some(Method::Get)
    } else if src.eq_ignore_ascii_case("POST") {
        Some(Method::Post)
    } else if src.eq_ignore_ascii_case("PUT") {
        Some(Method::Put)
    } else if src.eq_ignore_ascii_case("DELETE") {
        Some(Method::Delete)
    } else if src.eq_ignore_ascii_case("PATCH") {
        Some(Method::Patch)
    } else if src.eq_ignore_ascii_case("OPTIONS") {
        Some(Method::Options)
    } else if src.eq_ignore_ascii_case("HEAD") {
        Some(Method::Head)
    } else {
        None
    }
}

/// A route's method filter: either a specific [`Method`], or `Any`, which
/// matches every method accepted above (§4.7 "Methods accepted... any").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Exact(Method),
    Any,
}

impl RouteMethod {
    #[inline]
    pub(crate) fn matches(&self, method: Method) -> bool {
        match self {
            RouteMethod::Exact(m) => *m == method,
            RouteMethod::Any => true,
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Exact(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    #[test]
    fn parse_accepts_case_insensitively() {
        let cases = [
            ("GET", Some(Method::Get)), ("get", Some(Method::Get)),
            ("POST", Some(Method::Post)), ("PUT", Some(Method::Put)),
            ("DELETE", Some(Method::Delete)), ("PATCH", Some(Method::Patch)),
            ("OPTIONS", Some(Method::Options)), ("HEAD", Some(Method::Head)),
            ("TRACE", None), ("CONNECT", None), ("", None),
        ];

        for (input, expected) in cases {
            assert_eq!(Method::parse(input), expected, "input: {input}");
        }
    }

    #[test]
    fn route_method_any_matches_everything() {
        for m in [Method::Get, Method::Post, Method::Head] {
            assert!(RouteMethod::Any.matches(m));
        }
    }

    #[test]
    fn route_method_exact_matches_only_itself() {
        let route = RouteMethod::Exact(Method::Post);
        assert!(route.matches(Method::Post));
        assert!(!route.matches(Method::Get));
    }
}
