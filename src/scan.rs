//! Expression-boundary scanning over template source. The rewrite
//! passes, the include resolver and the inheritance resolver all need
//! to find `@name(...)` occurrences whose argument text may contain
//! nested parentheses, brackets and quoted strings; a depth-counting
//! scanner does that where a regex would truncate the condition.

/// A located `@name` or `@name(args)` occurrence. `start..end` are
/// byte offsets covering the whole occurrence including the argument
/// list; `args` is the text between the outer parentheses, untrimmed.
#[derive(Debug, PartialEq, Eq)]
pub struct Directive<'t> {
    pub start: usize,
    pub end: usize,
    pub args: Option<&'t str>,
}

fn is_word(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Byte offset of the `)` matching the `(` at `open`, skipping over
/// nested parens/brackets and the contents of quoted strings
/// (backslash escapes respected). None if the input ends first.
pub fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    debug_assert_eq!(bytes.get(open), Some(&b'('));
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => {
                    depth -= 1;
                    if depth <= 0 {
                        return if c == b')' { Some(i) } else { None };
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Find the next `@name` at or after `from`. A word boundary is
/// required after the name, so searching for `for` will not match
/// inside `@foreach`; a doubled `@@` never matches. Whitespace is
/// allowed between the name and an opening `(`.
pub fn find_directive<'t>(text: &'t str, name: &str, from: usize) -> Option<Directive<'t>> {
    let bytes = text.as_bytes();
    let pat = format!("@{name}");
    let mut at = from;
    while let Some(rel) = text[at..].find(&pat) {
        let start = at + rel;
        at = start + 1;
        if start > 0 && bytes[start - 1] == b'@' {
            continue;
        }
        let after_name = start + pat.len();
        if after_name < bytes.len() && is_word(bytes[after_name]) {
            continue;
        }
        // optional whitespace, then an argument list
        let mut p = after_name;
        while p < bytes.len() && (bytes[p] == b' ' || bytes[p] == b'\t') {
            p += 1;
        }
        if p < bytes.len() && bytes[p] == b'(' {
            if let Some(close) = matching_paren(text, p) {
                return Some(Directive {
                    start,
                    end: close + 1,
                    args: Some(&text[p + 1..close]),
                });
            }
            // unterminated argument list: treat as bare and let it
            // pass through as literal text downstream
        }
        return Some(Directive {
            start,
            end: after_name,
            args: None,
        });
    }
    None
}

/// Split `s` on `sep` at paren/bracket depth 0, outside quotes.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth -= 1,
                _ => {
                    if depth == 0 && c == sep as u8 {
                        parts.push(&s[last..i]);
                        last = i + 1;
                    }
                }
            }
        }
        i += 1;
    }
    parts.push(&s[last..]);
    parts
}

/// Split around a whitespace-delimited keyword (`as`, `or`) occurring
/// at depth 0 outside quotes. Returns the trimmed halves.
pub fn split_keyword<'t>(s: &'t str, keyword: &str) -> Option<(&'t str, &'t str)> {
    let bytes = s.as_bytes();
    let pat = keyword.as_bytes();
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth -= 1,
                _ => {
                    if depth == 0
                        && bytes[i..].starts_with(pat)
                        && i > 0
                        && bytes[i - 1].is_ascii_whitespace()
                        && bytes
                            .get(i + pat.len())
                            .map_or(false, |c| c.is_ascii_whitespace())
                    {
                        return Some((s[..i].trim(), s[i + pat.len()..].trim()));
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// Drop one level of matching single or double quotes, if present.
pub fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    let b = s.as_bytes();
    if b.len() >= 2 && (b[0] == b'\'' || b[0] == b'"') && b[b.len() - 1] == b[0] {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Find `needle` outside single/double quoted regions.
pub fn find_outside_quotes(s: &str, needle: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let pat = needle.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            if bytes[i..].starts_with(pat) {
                return Some(i);
            }
            if c == b'\'' || c == b'"' {
                quote = Some(c);
            }
        }
        i += 1;
    }
    None
}

/// Find the `?>` closing an instruction tag, skipping quoted strings
/// in the tag body. `from` points just past the opening marker.
pub fn tag_end(s: &str, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'?' if bytes.get(i + 1) == Some(&b'>') => return Some(i),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[test]
fn t_matching_paren() {
    let s = "(count($items, true) > 3)";
    assert_eq!(matching_paren(s, 0), Some(s.len() - 1));
    let s = "(format('%s)', $x))";
    assert_eq!(matching_paren(s, 0), Some(s.len() - 1));
    assert_eq!(matching_paren("(unclosed", 0), None);
}

#[test]
fn t_find_directive() {
    let t = "a @if(count($x, true) > 3) b";
    let d = find_directive(t, "if", 0).unwrap();
    assert_eq!(d.args, Some("count($x, true) > 3"));
    assert_eq!(&t[d.start..d.end], "@if(count($x, true) > 3)");
    // a word boundary is required after the name
    assert!(find_directive("@foreach($a as $b)", "for", 0).is_none());
    assert!(find_directive("@isset($a)", "if", 0).is_none());
    // directly adjacent text is fine
    assert!(find_directive("x@endif", "endif", 0).is_some());
    // the doubled form is an escape, never a directive
    assert!(find_directive("@@if", "if", 0).is_none());
}

#[test]
fn t_split_top_level() {
    assert_eq!(split_top_level("a, f(b, c), d", ','), vec!["a", " f(b, c)", " d"]);
    assert_eq!(split_top_level("'a,b', c", ','), vec!["'a,b'", " c"]);
    assert_eq!(split_top_level("one", ','), vec!["one"]);
}

#[test]
fn t_split_keyword() {
    assert_eq!(split_keyword("$items as $item", "as"), Some(("$items", "$item")));
    assert_eq!(split_keyword("f($a as $b) as $x", "as"), Some(("f($a as $b)", "$x")));
    assert_eq!(split_keyword("'as is' as $x", "as"), Some(("'as is'", "$x")));
    assert_eq!(split_keyword("$x", "as"), None);
}

#[test]
fn t_strip_quotes() {
    assert_eq!(strip_quotes(" 'name' "), "name");
    assert_eq!(strip_quotes("\"name\""), "name");
    assert_eq!(strip_quotes("$name"), "$name");
}

#[test]
fn t_tag_end() {
    let s = "echo '?>' ?> rest";
    assert_eq!(tag_end(s, 0), Some(10));
    assert_eq!(&s[tag_end(s, 0).unwrap()..], "?> rest");
}
