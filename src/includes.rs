//! Include resolution: splices the compiled content of referenced
//! templates in place of `@include`-family directives. Runs after
//! inheritance resolution and before the rewrite table, so included
//! content is itself fully compiled when spliced and the surrounding
//! template still sees the combined text.

use log::debug;

use crate::error::{Result, ScytheError};
use crate::renderer::Scythe;
use crate::scan::{find_directive, split_top_level, strip_quotes};

pub fn resolve(scythe: &Scythe, text: &str, depth: usize) -> Result<String> {
    let text = expand_each(text);
    let text = resolve_include_when(scythe, &text, depth)?;
    let text = resolve_include_if(scythe, &text, depth)?;
    resolve_include(scythe, &text, depth)
}

/// `@each(view, items, var[, emptyView])` is sugar for a forelse (or
/// foreach, without an empty view) around an include of `view` that
/// aliases each element to `var`. Expanded to directives here and
/// picked up by the passes that follow.
fn expand_each(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, "each", pos) {
        let Some(args) = d.args else {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        };
        let parts = split_top_level(args, ',');
        if parts.len() < 3 {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        }
        let view = strip_quotes(parts[0]);
        let items = parts[1].trim();
        let var = strip_quotes(parts[2]).trim_start_matches('$');
        let expanded = match parts.get(3) {
            Some(empty_view) => {
                let empty_view = strip_quotes(empty_view);
                format!(
                    "@forelse({items} as ${var})@include('{view}', [{var}: ${var}])\
                     @empty\n@include('{empty_view}')@endforelse"
                )
            }
            None => format!(
                "@foreach({items} as ${var})@include('{view}', [{var}: ${var}])@endforeach"
            ),
        };
        out.push_str(&text[pos..d.start]);
        out.push_str(&expanded);
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    out
}

/// `@includeWhen(cond, id)`: the spliced content runs behind a
/// runtime guard, so the include only executes when `cond` holds.
fn resolve_include_when(scythe: &Scythe, text: &str, depth: usize) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, "includeWhen", pos) {
        let Some(args) = d.args else {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        };
        let parts = split_top_level(args, ',');
        if parts.len() < 2 {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        }
        let cond = parts[0].trim();
        let id = strip_quotes(parts[1]);
        let content = scythe.compiled_contents(id, depth + 1)?;
        out.push_str(&text[pos..d.start]);
        out.push_str(&format!("<?scy if {cond} ?>{content}<?scy endif ?>"));
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// `@includeIf(id)`: splices nothing, and raises nothing, when the
/// template does not exist.
fn resolve_include_if(scythe: &Scythe, text: &str, depth: usize) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, "includeIf", pos) {
        let Some(args) = d.args else {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        };
        let id = strip_quotes(args);
        out.push_str(&text[pos..d.start]);
        if scythe.exists(id)? {
            out.push_str(&scythe.compiled_contents(id, depth + 1)?);
        } else {
            debug!("includeIf: skipping missing template '{id}'");
        }
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// `@include(id)` and `@include(id, [k: v, ..])`. A missing template
/// fails the whole compile; the data form wraps the content in a
/// scope so the bindings are visible to the included content only.
fn resolve_include(scythe: &Scythe, text: &str, depth: usize) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, "include", pos) {
        let Some(args) = d.args else {
            out.push_str(&text[pos..d.end]);
            pos = d.end;
            continue;
        };
        let parts = split_top_level(args, ',');
        let id = strip_quotes(parts[0]);
        let content = scythe.compiled_contents(id, depth + 1)?;
        out.push_str(&text[pos..d.start]);
        if parts.len() > 1 {
            let binds = parse_data_map(&parts[1..].join(","))?;
            out.push_str(&format!("<?scy scope {binds} ?>{content}<?scy endscope ?>"));
        } else {
            out.push_str(&content);
        }
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// `[k: v, 'k2' => v2, ..]` into the scope-tag binding list
/// `k = v, k2 = v2`.
fn parse_data_map(src: &str) -> Result<String> {
    let src = src.trim();
    let inner = src
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            ScytheError::Syntax(format!("malformed include data map '{src}'"))
        })?;
    let mut binds = Vec::new();
    for pair in split_top_level(inner, ',') {
        if pair.trim().is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once("=>")
            .or_else(|| pair.split_once(':'))
            .ok_or_else(|| {
                ScytheError::Syntax(format!("malformed include data pair '{pair}'"))
            })?;
        let key = strip_quotes(key).trim_start_matches('$');
        binds.push(format!("{} = {}", key, value.trim()));
    }
    Ok(binds.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_expand_each() {
        assert_eq!(
            expand_each("@each('row', $xs, 'x')"),
            "@foreach($xs as $x)@include('row', [x: $x])@endforeach"
        );
        assert_eq!(
            expand_each("@each('row', $xs, 'x', 'none')"),
            "@forelse($xs as $x)@include('row', [x: $x])@empty\n@include('none')@endforelse"
        );
    }

    #[test]
    fn t_parse_data_map() {
        assert_eq!(parse_data_map("[name: $muppet]").unwrap(), "name = $muppet");
        assert_eq!(
            parse_data_map("['a' => 1, b: 'x, y']").unwrap(),
            "a = 1, b = 'x, y'"
        );
        assert!(parse_data_map("not a map").is_err());
    }
}
