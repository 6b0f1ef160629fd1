//! HTML escaping as applied by escaped echoes (`{{ .. }}`) and the
//! display mutators. Converts the five metacharacters, both quote
//! kinds included.

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[test]
fn t_html_escape() {
    assert_eq!(html_escape("a < b"), "a &lt; b");
    assert_eq!(html_escape("\"quoted\" & 'single'"),
               "&quot;quoted&quot; &amp; &#039;single&#039;");
    assert_eq!(html_escape("plain"), "plain");
    assert_eq!(html_escape("<script>"), "&lt;script&gt;");
}
