//! The directive rewrite table: an ordered list of passes converting
//! directive syntax into `<?scy .. ?>` instruction tags, leaving
//! unrecognized text untouched. Pure string-to-string, no I/O.
//!
//! Order is part of the contract. Load-bearing constraints:
//!   - comment stripping runs before the echo pass, so comment bodies
//!     are never echoed;
//!   - `@{{` protection runs before the echo pass and restoration runs
//!     last, so client-side `{{ }}` syntax passes through untouched;
//!   - the bare `@empty` (forelse separator) and the argument form
//!     `@empty(expr)` (conditional) are distinguished by the presence
//!     of an argument list, never by rule order;
//!   - user-registered directives run after every built-in rule.
//!
//! Emitted fragments contain neither `{{` nor `@`, so re-running the
//! table on its own output is the identity.

use kstring::KString;
use lazy_static::lazy_static;

use crate::scan::{
    find_directive, find_outside_quotes, split_keyword, split_top_level,
};

/// The marker standing in for a protected `@{{` while the echo pass
/// runs. U+0001 cannot appear in template source.
const PROTECT: &str = "\u{1}";

enum Rule {
    /// Whole-text pass.
    Pass(fn(&str) -> String),
    /// `@name` without arguments, fixed replacement.
    Bare(&'static str, &'static str),
    /// `@name(args)`; the function builds the replacement, or returns
    /// None to let a malformed occurrence pass through as literal text.
    Args(&'static str, fn(&str) -> Option<String>),
    /// Directive legal in both forms, like `@break`/`@break(n)`.
    Mixed(&'static str, &'static str, fn(&str) -> Option<String>),
}

lazy_static! {
    static ref RULES: Vec<Rule> = vec![
        Rule::Pass(pass_comments),
        Rule::Pass(pass_protect),
        Rule::Pass(pass_echoes),
        // display mutators
        Rule::Args("json", |a| Some(format!("<?scy echo json({}) ?>", a.trim()))),
        Rule::Args("lower", |a| Some(format!("<?scy echo html(lower({})) ?>", a.trim()))),
        Rule::Args("upper", |a| Some(format!("<?scy echo html(upper({})) ?>", a.trim()))),
        Rule::Args("ucfirst", |a| Some(format!("<?scy echo html(ucfirst({})) ?>", a.trim()))),
        Rule::Args("ucwords", |a| Some(format!("<?scy echo html(ucwords({})) ?>", a.trim()))),
        Rule::Args("format", emit_format),
        Rule::Args("sprintf", emit_format),
        Rule::Args("wrap", |a| Some(format!("<?scy echo html(wrap({})) ?>", a.trim()))),
        // assignment
        Rule::Args("set", emit_set),
        Rule::Args("unset", |a| {
            Some(format!("<?scy unset ${} ?>", a.trim().trim_start_matches('$')))
        }),
        // conditionals
        Rule::Args("isset", |a| Some(format!("<?scy if isset({}) ?>", a.trim()))),
        Rule::Bare("endisset", "<?scy endif ?>"),
        Rule::Args("has", |a| {
            let a = a.trim();
            Some(format!("<?scy if isset({a}) && !empty({a}) ?>"))
        }),
        Rule::Bare("endhas", "<?scy endif ?>"),
        Rule::Args("unless", |a| Some(format!("<?scy if !({}) ?>", a.trim()))),
        Rule::Bare("endunless", "<?scy endif ?>"),
        // switch
        Rule::Args("switch", |a| Some(format!("<?scy switch {} ?>", a.trim()))),
        Rule::Args("case", |a| Some(format!("<?scy case {} ?>", a.trim()))),
        Rule::Bare("default", "<?scy default ?>"),
        Rule::Bare("endswitch", "<?scy endswitch ?>"),
        Rule::Mixed("continue", "<?scy continue ?>", |a| {
            Some(format!("<?scy continue if {} ?>", a.trim()))
        }),
        Rule::Mixed("break", "<?scy break ?>", emit_break),
        // forelse; its bare `@empty` separator and the conditional
        // `@empty(expr)` share a token, split by form in one Mixed rule
        Rule::Args("forelse", emit_forelse),
        Rule::Mixed(
            "empty",
            "<?scy endforeach ?><?scy else ?>",
            |a| Some(format!("<?scy if empty({}) ?>", a.trim())),
        ),
        Rule::Bare("endforelse", "<?scy endif ?>"),
        Rule::Bare("endempty", "<?scy endif ?>"),
        // loops and raw control structures
        Rule::Args("foreach", emit_foreach),
        Rule::Bare("endforeach", "<?scy endforeach ?>"),
        Rule::Args("if", |a| Some(format!("<?scy if {} ?>", a.trim()))),
        Rule::Args("elseif", |a| Some(format!("<?scy elseif {} ?>", a.trim()))),
        Rule::Bare("else", "<?scy else ?>"),
        Rule::Bare("endif", "<?scy endif ?>"),
        Rule::Args("for", |a| Some(format!("<?scy for {} ?>", a.trim()))),
        Rule::Bare("endfor", "<?scy endfor ?>"),
        Rule::Args("while", |a| Some(format!("<?scy while {} ?>", a.trim()))),
        Rule::Bare("endwhile", "<?scy endwhile ?>"),
        // raw passthrough
        Rule::Bare("php", "<?scy "),
        Rule::Bare("endphp", " ?>"),
        Rule::Pass(pass_restore),
    ];
}

/// Run every built-in pass, in table order.
pub fn rewrite(text: &str) -> String {
    RULES.iter().fold(text.to_string(), |t, rule| match rule {
        Rule::Pass(f) => f(&t),
        Rule::Bare(name, emit) => apply_directive(&t, name, Some(*emit), None),
        Rule::Args(name, f) => apply_directive(&t, name, None, Some(f)),
        Rule::Mixed(name, emit, f) => apply_directive(&t, name, Some(*emit), Some(f)),
    })
}

fn apply_directive(
    text: &str,
    name: &str,
    bare: Option<&str>,
    args_fn: Option<&fn(&str) -> Option<String>>,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(d) = find_directive(text, name, pos) {
        let replacement = match d.args {
            Some(a) => args_fn.and_then(|f| f(a)),
            None => bare.map(str::to_string),
        };
        out.push_str(&text[pos..d.start]);
        match replacement {
            Some(r) => out.push_str(&r),
            None => out.push_str(&text[d.start..d.end]),
        }
        pos = d.end;
    }
    out.push_str(&text[pos..]);
    out
}

fn pass_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(rel) = text[pos..].find("{{--") {
        let start = pos + rel;
        out.push_str(&text[pos..start]);
        match text[start + 4..].find("--}}") {
            Some(r) => pos = start + 4 + r + 4,
            None => {
                // unterminated comment: keep it literal
                pos = start;
                break;
            }
        }
    }
    out.push_str(&text[pos..]);
    out
}

fn pass_protect(text: &str) -> String {
    text.replace("@{{", PROTECT)
}

fn pass_restore(text: &str) -> String {
    text.replace(PROTECT, "{{")
}

fn pass_echoes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    loop {
        let raw = text[pos..].find("{!!");
        let esc = text[pos..].find("{{");
        let (start, is_raw) = match (raw, esc) {
            (Some(r), Some(e)) => {
                if r < e {
                    (pos + r, true)
                } else {
                    (pos + e, false)
                }
            }
            (Some(r), None) => (pos + r, true),
            (None, Some(e)) => (pos + e, false),
            (None, None) => break,
        };
        let (open_len, closer) = if is_raw { (3, "!!}") } else { (2, "}}") };
        match find_outside_quotes(&text[start + open_len..], closer) {
            Some(r) => {
                let inner = text[start + open_len..start + open_len + r].trim();
                out.push_str(&text[pos..start]);
                out.push_str(&emit_echo(inner, is_raw));
                pos = start + open_len + r + closer.len();
            }
            None => {
                // unterminated echo, keep the marker literal
                out.push_str(&text[pos..start + open_len]);
                pos = start + open_len;
            }
        }
    }
    out.push_str(&text[pos..]);
    out
}

fn emit_echo(inner: &str, is_raw: bool) -> String {
    if is_raw {
        return format!("<?scy echo {inner} ?>");
    }
    // `{{ expr or default }}`: escaped value of expr if set, else of
    // the default
    if let Some((expr, default)) = split_keyword(inner, "or") {
        return format!("<?scy echo isset({expr}) ? html({expr}) : html({default}) ?>");
    }
    format!("<?scy echo html({inner}) ?>")
}

fn emit_format(a: &str) -> Option<String> {
    Some(format!("<?scy echo html(format({})) ?>", a.trim()))
}

fn emit_set(a: &str) -> Option<String> {
    let parts = split_top_level(a, ',');
    if parts.len() < 2 {
        return None;
    }
    let name = parts[0].trim().trim_start_matches('$');
    let value = parts[1..].join(",");
    Some(format!("<?scy ${} = {} ?>", name, value.trim()))
}

fn emit_break(a: &str) -> Option<String> {
    let a = a.trim();
    match a.parse::<usize>() {
        Ok(n) => Some(format!("<?scy break {n} ?>")),
        Err(_) => Some(format!("<?scy break if {a} ?>")),
    }
}

fn emit_forelse(a: &str) -> Option<String> {
    let (items, var) = split_keyword(a, "as")?;
    Some(format!(
        "<?scy if !empty({items}) ?><?scy foreach {items} as {var} ?>"
    ))
}

fn emit_foreach(a: &str) -> Option<String> {
    let (items, var) = split_keyword(a, "as")?;
    Some(format!("<?scy foreach {items} as {var} ?>"))
}

/// A user-registered directive, applied after the built-in table.
/// Registered by directive name, with arguments located by the same
/// balanced-parenthesis scanner the built-in rules use.
pub struct UserDirective {
    name: KString,
    handler: DirectiveHandler,
}

pub enum DirectiveHandler {
    /// Fixed replacement text.
    Replace(String),
    /// Called with the scanned, trimmed argument list.
    Call(Box<dyn Fn(&[&str]) -> String + Send + Sync>),
}

impl UserDirective {
    pub fn new(name: &str, handler: DirectiveHandler) -> Self {
        let name = name.strip_prefix('@').unwrap_or(name);
        UserDirective {
            name: KString::from_ref(name),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        while let Some(d) = find_directive(text, &self.name, pos) {
            out.push_str(&text[pos..d.start]);
            let replacement = match &self.handler {
                DirectiveHandler::Replace(s) => s.clone(),
                DirectiveHandler::Call(f) => {
                    let args: Vec<&str> = match d.args {
                        Some(a) if !a.trim().is_empty() => {
                            split_top_level(a, ',').iter().map(|s| s.trim()).collect()
                        }
                        _ => Vec::new(),
                    };
                    f(&args)
                }
            };
            out.push_str(&replacement);
            pos = d.end;
        }
        out.push_str(&text[pos..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_stripped_before_echo() {
        // a comment body containing echo syntax must vanish entirely
        assert_eq!(rewrite("{{-- {{ $secret }} --}}"), "");
        assert_eq!(rewrite("a {{-- gone --}}b"), "a b");
    }

    #[test]
    fn escaped_echo() {
        assert_eq!(rewrite("{{ $name }}"), "<?scy echo html($name) ?>");
        assert_eq!(rewrite("{{$name}}"), "<?scy echo html($name) ?>");
    }

    #[test]
    fn unescaped_echo() {
        assert_eq!(rewrite("{!! $html !!}"), "<?scy echo $html ?>");
    }

    #[test]
    fn echo_with_default() {
        assert_eq!(
            rewrite("{{ $name or 'anon' }}"),
            "<?scy echo isset($name) ? html($name) : html('anon') ?>"
        );
    }

    #[test]
    fn client_side_syntax_passes_through() {
        assert_eq!(rewrite("@{{ vue }}"), "{{ vue }}");
    }

    #[test]
    fn mutators() {
        assert_eq!(rewrite("@json($data)"), "<?scy echo json($data) ?>");
        assert_eq!(rewrite("@lower($s)"), "<?scy echo html(lower($s)) ?>");
        assert_eq!(
            rewrite("@wrap($s, 20, '<br>')"),
            "<?scy echo html(wrap($s, 20, '<br>')) ?>"
        );
        assert_eq!(
            rewrite("@format('%05d', $n)"),
            "<?scy echo html(format('%05d', $n)) ?>"
        );
    }

    #[test]
    fn set_and_unset() {
        assert_eq!(rewrite("@set($n, 1 + 2)"), "<?scy $n = 1 + 2 ?>");
        assert_eq!(rewrite("@set(title, 'a, b')"), "<?scy $title = 'a, b' ?>");
        assert_eq!(rewrite("@unset($n)"), "<?scy unset $n ?>");
    }

    #[test]
    fn conditionals() {
        assert_eq!(rewrite("@isset($a)x@endisset"), "<?scy if isset($a) ?>x<?scy endif ?>");
        assert_eq!(
            rewrite("@has($a)x@endhas"),
            "<?scy if isset($a) && !empty($a) ?>x<?scy endif ?>"
        );
        assert_eq!(rewrite("@unless($a)x@endunless"), "<?scy if !($a) ?>x<?scy endif ?>");
        assert_eq!(rewrite("@empty($a)x@endempty"), "<?scy if empty($a) ?>x<?scy endif ?>");
    }

    #[test]
    fn nested_parens_in_conditions_survive() {
        assert_eq!(
            rewrite("@if(count($x, true) > 3)y@endif"),
            "<?scy if count($x, true) > 3 ?>y<?scy endif ?>"
        );
        assert_eq!(
            rewrite("@if(format('%s)', $x) == ')')y@endif"),
            "<?scy if format('%s)', $x) == ')' ?>y<?scy endif ?>"
        );
    }

    #[test]
    fn foreach_and_forelse() {
        assert_eq!(
            rewrite("@foreach($items as $item)x@endforeach"),
            "<?scy foreach $items as $item ?>x<?scy endforeach ?>"
        );
        assert_eq!(
            rewrite("@forelse($items as $item)x@empty y@endforelse"),
            "<?scy if !empty($items) ?><?scy foreach $items as $item ?>x\
             <?scy endforeach ?><?scy else ?> y<?scy endif ?>"
        );
    }

    #[test]
    fn break_and_continue() {
        assert_eq!(rewrite("@break"), "<?scy break ?>");
        assert_eq!(rewrite("@break(2)"), "<?scy break 2 ?>");
        assert_eq!(rewrite("@break($done)"), "<?scy break if $done ?>");
        assert_eq!(rewrite("@continue"), "<?scy continue ?>");
        assert_eq!(rewrite("@continue($skip)"), "<?scy continue if $skip ?>");
    }

    #[test]
    fn switch_family() {
        assert_eq!(
            rewrite("@switch($n)@case(1)a@break@default b@endswitch"),
            "<?scy switch $n ?><?scy case 1 ?>a<?scy break ?>\
             <?scy default ?> b<?scy endswitch ?>"
        );
    }

    #[test]
    fn raw_passthrough() {
        assert_eq!(rewrite("@php echo $x @endphp"), "<?scy  echo $x  ?>");
    }

    #[test]
    fn unmatched_closer_passes_through() {
        // no matching open rule exists for a stray token; it stays
        // literal and will fail at execution, not compilation
        assert_eq!(rewrite("@endfoo"), "@endfoo");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let src = "a {{ $x }} @if($y > f(1, 2))b@else c@endif \
                   @foreach($l as $i){!! $i !!}@endforeach";
        let once = rewrite(src);
        assert_eq!(rewrite(&once), once);
    }

    #[test]
    fn user_directive_replace() {
        let d = UserDirective::new("@now", DirectiveHandler::Replace("<?scy echo $now ?>".into()));
        assert_eq!(d.apply("at @now!"), "at <?scy echo $now ?>!");
    }

    #[test]
    fn user_directive_call() {
        let d = UserDirective::new(
            "date",
            DirectiveHandler::Call(Box::new(|args: &[&str]| {
                format!("<?scy echo format('%s/%s', {}, {}) ?>", args[0], args[1])
            })),
        );
        assert_eq!(
            d.apply("@date($d, $m)"),
            "<?scy echo format('%s/%s', $d, $m) ?>"
        );
    }
}
