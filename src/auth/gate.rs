//! Authentication gate pieces: token header extraction and the anonymous-path
//! exclusion list consulted before requiring a token.

use axum::http::HeaderMap;
use regex::Regex;

const TOKEN_SCHEME: &str = "token ";

/// Extract the credential from an `Authorization: token <value>` header.
/// Returns `None` when the header is absent or uses another scheme.
pub fn token_of(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("Authorization")?.to_str().ok()?;
    value.strip_prefix(TOKEN_SCHEME).filter(|t| !t.is_empty())
}

/// Glob-style path exclusions recorded at registration time:
/// `**` matches any sequence, `*` a single segment, `?` a single character.
/// Matching is anchored (full-path).
#[derive(Debug, Default)]
pub struct AnonymousPaths {
    compiled: Vec<Regex>,
}

impl AnonymousPaths {
    pub fn add(&mut self, pattern: &str) {
        self.compiled.push(glob_to_regex(pattern));
    }

    pub fn matches(&self, path: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn glob_to_regex(pattern: &str) -> Regex {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".+");
                } else {
                    re.push_str("[^/]+");
                }
            }
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    // Patterns come from registration code; a malformed one is a programming
    // error surfaced at startup.
    Regex::new(&re).unwrap_or_else(|e| panic!("invalid anonymous path pattern {pattern:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_scheme_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_of(&headers), None);
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(token_of(&headers), None);
        headers.insert("Authorization", HeaderValue::from_static("token abc"));
        assert_eq!(token_of(&headers), Some("abc"));
        headers.insert("Authorization", HeaderValue::from_static("token "));
        assert_eq!(token_of(&headers), None);
    }

    #[test]
    fn double_star_matches_any_sequence() {
        let mut paths = AnonymousPaths::default();
        paths.add("/auth/**");
        assert!(paths.matches("/auth/login"));
        assert!(paths.matches("/auth/oauth/callback"));
        assert!(!paths.matches("/auth/"));
        assert!(!paths.matches("/user/login"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        let mut paths = AnonymousPaths::default();
        paths.add("/public/*");
        assert!(paths.matches("/public/info"));
        assert!(!paths.matches("/public/info/deep"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let mut paths = AnonymousPaths::default();
        paths.add("/v?/ping");
        assert!(paths.matches("/v1/ping"));
        assert!(!paths.matches("/v12/ping"));
    }

    #[test]
    fn exact_path_exclusion() {
        let mut paths = AnonymousPaths::default();
        paths.add("/demo/echo");
        assert!(paths.matches("/demo/echo"));
        assert!(!paths.matches("/demo/echoX"));
    }
}
