use url::Url;

/// Collapse runs of `/` and strip a trailing slash, keeping the root path `/`
pub(crate) fn canonical_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Normalize a request URL before execution: slashes in the path are
/// collapsed and a trailing slash is removed, except for the root path.
/// Query and fragment are left untouched.
#[must_use]
pub fn normalize_url(url: &Url) -> Url {
    if url.cannot_be_a_base() {
        return url.clone();
    }
    let path = canonical_path(url.path());
    if path == url.path() {
        return url.clone();
    }
    let mut normalized = url.clone();
    normalized.set_path(&path);
    normalized
}

/// Path-level deduplication key: lowercase `host+path`, query ignored.
///
/// `http://Example.com//a/b/?x=1` and `http://example.com/a/b?x=2` share the
/// key `example.com/a/b`. A non-default port is kept.
#[must_use]
pub fn dedup_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let path = canonical_path(url.path()).to_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}{path}"),
        None => format!("{host}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/", "/")]
    #[case("", "/")]
    #[case("//", "/")]
    #[case("/a/", "/a")]
    #[case("/a//b///c/", "/a/b/c")]
    #[case("/A/b", "/A/b")]
    fn test_canonical_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(canonical_path(input), expected);
    }

    #[test]
    fn test_normalize_url_keeps_query() {
        let url = Url::parse("http://example.com//api//users/?id=1").unwrap();
        assert_eq!(
            normalize_url(&url).as_str(),
            "http://example.com/api/users?id=1"
        );
    }

    #[test]
    fn test_normalize_url_leaves_opaque_urls() {
        let url = Url::parse("data:text/plain,hi").unwrap();
        assert_eq!(normalize_url(&url), url);
    }

    #[test]
    fn test_normalize_url_root() {
        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(normalize_url(&url).as_str(), "http://example.com/");
    }

    #[test]
    fn test_dedup_key_ignores_query_and_case() {
        let a = Url::parse("http://Example.com//A/b/?x=1").unwrap();
        let b = Url::parse("http://example.com/a/b?x=2").unwrap();
        assert_eq!(dedup_key(&a), "example.com/a/b");
        assert_eq!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn test_dedup_key_keeps_port() {
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(dedup_key(&url), "127.0.0.1:8080/x");
    }
}
