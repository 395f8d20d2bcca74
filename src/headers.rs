//! `hdr_` 쿼리 옵션 → 전송 헤더 매핑

use std::collections::BTreeMap;

/// 헤더로 매핑되는 옵션 키 접두사
pub const HEADER_OPTION_PREFIX: &str = "hdr_";

/// 헤더 맵 (이름은 소문자)
pub type HeaderMap = BTreeMap<String, String>;

/// `hdr_x_test=123` → `x-test: 123`
///
/// 접두사가 없는 키는 전송별 옵션이므로 무시한다.
pub fn map_headers(options: &BTreeMap<String, String>) -> HeaderMap {
    options
        .iter()
        .filter_map(|(key, value)| {
            let name = strip_prefix_ignore_case(key, HEADER_OPTION_PREFIX)?;
            if name.is_empty() {
                return None;
            }
            Some((name.replace('_', "-").to_ascii_lowercase(), value.clone()))
        })
        .collect()
}

/// 호출자 헤더 위에 URL 헤더를 덮어씀 (이름은 소문자로 정규화)
pub fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged: HeaderMap = base
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// `hdr_` 접두사가 붙은 옵션 키인지
pub fn is_header_option(key: &str) -> bool {
    strip_prefix_ignore_case(key, HEADER_OPTION_PREFIX).is_some_and(|name| !name.is_empty())
}

fn strip_prefix_ignore_case<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    match key.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => key.get(prefix.len()..),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hdr_query_parsing() {
        let mut options = BTreeMap::new();
        options.insert("hdr_x_test".to_string(), "123".to_string());
        options.insert("hdr_user_agent".to_string(), "ua".to_string());
        options.insert("mode".to_string(), "seq".to_string());

        let headers = map_headers(&options);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-test").map(String::as_str), Some("123"));
        assert_eq!(headers.get("user-agent").map(String::as_str), Some("ua"));
    }

    #[test]
    fn test_merge_prefers_url_headers() {
        let mut base = HeaderMap::new();
        base.insert("User-Agent".to_string(), "cli".to_string());
        base.insert("Accept".to_string(), "*/*".to_string());

        let mut url = HeaderMap::new();
        url.insert("user-agent".to_string(), "ua".to_string());

        let merged = merge_headers(&base, &url);
        assert_eq!(merged.get("user-agent").map(String::as_str), Some("ua"));
        assert_eq!(merged.get("accept").map(String::as_str), Some("*/*"));
    }
}
