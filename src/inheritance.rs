//! Template inheritance: `@extends` / `@section` / `@yield` /
//! `@push` / `@stack` resolution. Single-parent, named overridable
//! regions; the parent lookup goes back through the compiler, so
//! multi-level chains work as long as each level compiles on its own.

use std::collections::BTreeMap;

use kstring::KString;
use log::debug;

use crate::error::Result;
use crate::renderer::Scythe;
use crate::scan::{find_directive, split_top_level, strip_quotes, Directive};

/// Transient per-resolution accumulator. `sections` is last-write-
/// wins, `stacks` is append-only; conflating the two breaks repeated
/// pushes to one stack. Created empty for each resolution pass and
/// dropped with it, so nothing can leak across renders.
#[derive(Debug, Default)]
struct Build {
    sections: BTreeMap<KString, String>,
    stacks: BTreeMap<KString, String>,
}

/// True when the template's first significant content is an
/// `@extends` directive. Text that merely begins with the letters
/// `@extends` (say `@extendsfoo`) does not count.
pub fn has_extends(text: &str) -> bool {
    match find_directive(text, "extends", 0) {
        Some(d) => text[..d.start].trim().is_empty(),
        None => false,
    }
}

/// Resolve an `@extends` template: collect the child's sections and
/// pushes, fetch the compiled parent, and merge. Returns the merged
/// text, which still goes through include resolution, the rewrite
/// table and the final cleanup in the outer compile. Stack markers
/// are re-emitted after each insertion so a further extending level
/// can keep appending.
pub fn resolve(scythe: &Scythe, text: &str, depth: usize) -> Result<String> {
    let extends = find_directive(text, "extends", 0)
        .expect("resolve() is only called when has_extends() holds");
    let parent_id = strip_quotes(extends.args.unwrap_or("")).to_string();
    debug!("resolving inheritance from parent '{parent_id}'");

    let mut build = Build::default();
    let child = &text[extends.end..];
    collect_sections(scythe, child, depth, &mut build)?;
    collect_pushes(scythe, child, depth, &mut build)?;

    let mut merged = scythe.parent_contents(&parent_id, depth + 1)?;
    for (name, content) in &build.sections {
        merged = merge_section(&merged, name, content);
    }
    for (name, content) in &build.stacks {
        let appended = format!("{content}@stack('{name}')");
        merged = replace_all_matching(&merged, "stack", name, &appended);
    }
    Ok(merged)
}

/// Record `@section(name, value)` and `@section(name) .. @endsection`
/// definitions, compiling each captured body. Last write wins per
/// name.
fn collect_sections(scythe: &Scythe, child: &str, depth: usize, build: &mut Build) -> Result<()> {
    let mut pos = 0;
    while let Some(d) = find_directive(child, "section", pos) {
        let args = match d.args {
            Some(a) => a,
            None => {
                pos = d.end;
                continue;
            }
        };
        let parts = split_top_level(args, ',');
        let name = KString::from_ref(strip_quotes(parts[0]));
        if parts.len() >= 2 {
            // inline form: the value is a quoted literal or an
            // expression to echo
            let value = parts[1..].join(",");
            let value = value.trim();
            let body = if value.starts_with('\'') || value.starts_with('"') {
                strip_quotes(value).to_string()
            } else {
                format!("{{{{ {value} }}}}")
            };
            build.sections.insert(name, scythe.compile_fragment(&body, depth)?);
            pos = d.end;
        } else {
            let Some(term) = find_terminator(child, d.end, &["endsection", "stop"]) else {
                pos = d.end;
                continue;
            };
            let body = &child[d.end..term.start];
            build.sections.insert(name, scythe.compile_fragment(body, depth)?);
            pos = term.end;
        }
    }
    Ok(())
}

/// Record `@push(name) .. @endpush` blocks. Unlike sections these
/// accumulate: pushing twice to one stack appends.
fn collect_pushes(scythe: &Scythe, child: &str, depth: usize, build: &mut Build) -> Result<()> {
    let mut pos = 0;
    while let Some(d) = find_directive(child, "push", pos) {
        let (Some(args), Some(term)) = (d.args, find_terminator(child, d.end, &["endpush"]))
        else {
            pos = d.end;
            continue;
        };
        let name = KString::from_ref(strip_quotes(args));
        let body = scythe.compile_fragment(&child[d.end..term.start], depth)?;
        build.stacks.entry(name).or_default().push_str(&body);
        pos = term.end;
    }
    Ok(())
}

/// Earliest bare occurrence of any of `names` at or after `from`.
fn find_terminator<'t>(text: &'t str, from: usize, names: &[&str]) -> Option<Directive<'t>> {
    names
        .iter()
        .filter_map(|n| find_directive(text, n, from))
        .min_by_key(|d| d.start)
}

/// Substitute child `content` for every `@yield(name)`,
/// `@replace(name)` and `@section(name) .. @show|@stop|@endsection`
/// occurrence in the parent. A literal `@parent` token in the child
/// content merges the parent's own body in place of replacing it; a
/// bare placeholder has no body, so `@parent` merges as empty there.
fn merge_section(parent: &str, name: &str, content: &str) -> String {
    let flattened;
    let placeholder_fill: &str = if content.contains("@parent") {
        flattened = content.replace("@parent", "");
        &flattened
    } else {
        content
    };
    let mut out = replace_all_matching(parent, "yield", name, placeholder_fill);
    out = replace_all_matching(&out, "replace", name, placeholder_fill);

    let mut pos = 0;
    while let Some(d) = find_directive(&out, "section", pos) {
        let matches = d.args.map(strip_quotes) == Some(name);
        let (start, body_from) = (d.start, d.end);
        if !matches {
            pos = body_from;
            continue;
        }
        let Some(term) = find_terminator(&out, body_from, &["show", "stop", "endsection"]) else {
            pos = body_from;
            continue;
        };
        let (body_to, block_end) = (term.start, term.end);
        let original = out[body_from..body_to].to_string();
        let replacement = if content.contains("@parent") {
            content.replace("@parent", original.trim())
        } else {
            content.to_string()
        };
        let rebuilt = format!("{}{}{}", &out[..start], replacement, &out[block_end..]);
        out = rebuilt;
        pos = start + replacement.len();
    }
    out
}

/// Replace every `@directive(name)` occurrence whose argument matches
/// `name` with `content`.
fn replace_all_matching(text: &str, directive: &str, name: &str, content: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, directive, pos) {
        out.push_str(&text[pos..d.start]);
        if d.args.map(strip_quotes) == Some(name) {
            out.push_str(content);
        } else {
            out.push_str(&text[d.start..d.end]);
        }
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    out
}

/// Final pass at the top of a compile: unmatched `@yield`/`@replace`/
/// `@stack` placeholders are stripped to empty, and a section block
/// nobody overrode keeps its own body, losing only the markers.
pub(crate) fn cleanup(text: &str) -> String {
    let mut out = text.to_string();
    for directive in ["yield", "replace", "stack"] {
        let mut cleaned = String::with_capacity(out.len());
        let mut pos = 0;
        while let Some(d) = find_directive(&out, directive, pos) {
            cleaned.push_str(&out[pos..d.start]);
            if d.args.is_none() {
                cleaned.push_str(&out[d.start..d.end]);
            }
            pos = d.end;
        }
        cleaned.push_str(&out[pos..]);
        out = cleaned;
    }
    // leftover section blocks keep their default body
    let mut pos = 0;
    while let Some(d) = find_directive(&out, "section", pos) {
        let (start, body_from) = (d.start, d.end);
        let Some(term) = find_terminator(&out, body_from, &["show", "stop", "endsection"]) else {
            pos = body_from;
            continue;
        };
        let (body_to, block_end) = (term.start, term.end);
        let body = out[body_from..body_to].to_string();
        let rebuilt = format!("{}{}{}", &out[..start], body, &out[block_end..]);
        out = rebuilt;
        pos = start + body.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_has_extends() {
        assert!(has_extends("@extends('base')\nrest"));
        assert!(has_extends("\n  @extends('base')"));
        assert!(!has_extends("hello @extends('base')"));
        assert!(!has_extends("@extendsfoo bar"));
        assert!(!has_extends("@@extends('base')"));
    }

    #[test]
    fn t_replace_all_matching() {
        let parent = "<title>@yield('title')</title><h1>@yield('title')</h1>";
        assert_eq!(
            replace_all_matching(parent, "yield", "title", "Hi"),
            "<title>Hi</title><h1>Hi</h1>"
        );
    }

    #[test]
    fn t_merge_section_with_parent_token() {
        let parent = "x @section('side')base@show y";
        assert_eq!(
            merge_section(parent, "side", "@parent extra"),
            "x base extra y"
        );
        // a bare placeholder has no body for @parent to refer to
        assert_eq!(
            merge_section("x @yield('side') y", "side", "@parent extra"),
            "x  extra y"
        );
    }

    #[test]
    fn t_cleanup() {
        assert_eq!(cleanup("a @yield('x') b @stack('s') c"), "a  b  c");
        assert_eq!(cleanup("a @section('s')default@show b"), "a default b");
    }
}
