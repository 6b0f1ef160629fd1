//! Compilation output: directive syntax in, instruction tags out.

use scythe::{DirectiveHandler, Scythe, Settings};

fn scythe() -> (Scythe, tempfile::TempDir) {
    let cache = tempfile::tempdir().unwrap();
    let scythe = Scythe::new(Settings::new("tests/views", cache.path())).unwrap();
    (scythe, cache)
}

fn compile(source: &str) -> String {
    let (scythe, _cache) = scythe();
    scythe.compile_string(source).unwrap()
}

#[test]
fn echo_forms() {
    assert_eq!(compile("{{ $name }}"), "<?scy echo html($name) ?>");
    assert_eq!(compile("{!! $name !!}"), "<?scy echo $name ?>");
    assert_eq!(
        compile("{{ $name or 'anon' }}"),
        "<?scy echo isset($name) ? html($name) : html('anon') ?>"
    );
}

#[test]
fn comments_are_stripped() {
    assert_eq!(compile("a{{-- not {{ echoed }} --}}b"), "ab");
}

#[test]
fn client_side_syntax_is_protected() {
    assert_eq!(compile("@{{ vue }}"), "{{ vue }}");
}

#[test]
fn conditionals() {
    assert_eq!(
        compile("@if($a)x@elseif($b)y@else z@endif"),
        "<?scy if $a ?>x<?scy elseif $b ?>y<?scy else ?> z<?scy endif ?>"
    );
    assert_eq!(
        compile("@unless($a)x@endunless"),
        "<?scy if !($a) ?>x<?scy endif ?>"
    );
    assert_eq!(
        compile("@isset($a)x@endisset"),
        "<?scy if isset($a) ?>x<?scy endif ?>"
    );
}

#[test]
fn loops() {
    assert_eq!(
        compile("@foreach($xs as $x)i@endforeach"),
        "<?scy foreach $xs as $x ?>i<?scy endforeach ?>"
    );
    assert_eq!(
        compile("@forelse($xs as $x)i@empty e@endforelse"),
        "<?scy if !empty($xs) ?><?scy foreach $xs as $x ?>i\
         <?scy endforeach ?><?scy else ?> e<?scy endif ?>"
    );
}

#[test]
fn bare_and_conditional_empty_are_distinguished() {
    assert_eq!(compile("@empty($xs)e@endempty"), "<?scy if empty($xs) ?>e<?scy endif ?>");
    assert_eq!(compile("@empty"), "<?scy endforeach ?><?scy else ?>");
}

#[test]
fn assignment_directives() {
    assert_eq!(compile("@set($x, 1 + 2)"), "<?scy $x = 1 + 2 ?>");
    assert_eq!(compile("@unset($x)"), "<?scy unset $x ?>");
}

#[test]
fn display_mutators() {
    assert_eq!(compile("@upper($n)"), "<?scy echo html(upper($n)) ?>");
    assert_eq!(compile("@json($d)"), "<?scy echo json($d) ?>");
    assert_eq!(
        compile("@format('%05d', $n)"),
        "<?scy echo html(format('%05d', $n)) ?>"
    );
}

#[test]
fn php_block_passthrough() {
    assert_eq!(compile("@php echo $x @endphp"), "<?scy  echo $x  ?>");
}

#[test]
fn nested_parens_in_arguments() {
    assert_eq!(
        compile("@if(count($xs) > (1 + 2))x@endif"),
        "<?scy if count($xs) > (1 + 2) ?>x<?scy endif ?>"
    );
}

#[test]
fn user_directive_replace() {
    let cache = tempfile::tempdir().unwrap();
    let scythe = Scythe::new(
        Settings::new("tests/views", cache.path())
            .directive("hr", DirectiveHandler::Replace("<hr/>".into())),
    )
    .unwrap();
    assert_eq!(scythe.compile_string("a@hr b").unwrap(), "a<hr/> b");
}

#[test]
fn user_directive_call_gets_arguments() {
    let cache = tempfile::tempdir().unwrap();
    let scythe = Scythe::new(Settings::new("tests/views", cache.path()).directive(
        "repeat",
        DirectiveHandler::Call(Box::new(|args| {
            let n: usize = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(1);
            args.first().unwrap_or(&"").repeat(n)
        })),
    ))
    .unwrap();
    assert_eq!(scythe.compile_string("@repeat(ab, 3)").unwrap(), "ababab");
}

#[test]
fn text_merely_starting_with_a_directive_name_passes_through() {
    // `@extendsfoo` is not `@extends`, and must not start
    // inheritance resolution
    assert_eq!(compile("@extendsfoo bar"), "@extendsfoo bar");
}

#[test]
fn compiled_output_is_stable_under_recompilation() {
    let (scythe, _cache) = scythe();
    let once = scythe.compile_string("@if($a){{ $x }}@endif").unwrap();
    assert_eq!(scythe.compile_string(&once).unwrap(), once);
}
