/// 消息正文规范化：去标签、统一换行、裁剪首尾空白（保留内部换行）。
/// Body normalization: strip markup, normalize CRLF, trim (inner newlines kept).
///
/// 同一函数同时服务追加校验与回声指纹，两侧才能对得上。
/// The append validation and the echo fingerprint share this function so
/// both sides agree on the canonical body.
pub fn normalize_body(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            '\r' => {}
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_keeps_newlines() {
        assert_eq!(normalize_body("<b>hello</b>\nworld"), "hello\nworld");
        assert_eq!(normalize_body("  hi there \n"), "hi there");
        assert_eq!(normalize_body("a\r\nb"), "a\nb");
    }

    #[test]
    fn markup_only_body_is_empty() {
        assert_eq!(normalize_body("<div><br/></div>"), "");
        assert_eq!(normalize_body("   "), "");
    }

    #[test]
    fn unclosed_tag_drops_the_tail() {
        assert_eq!(normalize_body("ok <img src="), "ok");
    }
}
