use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const PATH_SEGMENTS: &AsciiSet = &UNRESERVED.remove(b'/');

/// 对象名称作为 URL 路径时的转义，保留 `/`
pub(crate) fn escape_path(key: &str) -> String {
    utf8_percent_encode(key, PATH_SEGMENTS).to_string()
}

/// 查询参数值的转义
pub(crate) fn escape_query_value(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("a/b c/d+e.png"), "a/b%20c/d%2Be.png");
        assert_eq!(escape_path("中"), "%E4%B8%AD");
        assert_eq!(escape_path("plain-key_1.txt~"), "plain-key_1.txt~");
    }

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("a/b c&d=e"), "a%2Fb%20c%26d%3De");
        assert_eq!(escape_query_value("report.pdf"), "report.pdf");
    }
}
