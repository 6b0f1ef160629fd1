//! Execution of compiled templates. The rewrite pipeline produces
//! text with embedded `<?scy .. ?>` instruction tags; executing that
//! against a data context is an abstract capability (`Executor`) so a
//! host can substitute its own evaluation strategy. `Interp`, the
//! built-in implementation, is a small tree-walking interpreter.

pub mod expr;
pub mod interp;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::loopstack::LoopStack;

/// The variable context a template is populated with.
pub type Data = Map<String, Value>;

/// Per-render execution state: a stack of variable scopes (includes
/// with data push one) plus the loop context stack. Created fresh for
/// every execution, so renders cannot leak state into each other.
pub struct Ctx {
    scopes: Vec<Data>,
    pub loops: LoopStack,
}

impl Ctx {
    pub fn new(data: Data) -> Self {
        Ctx {
            scopes: vec![data],
            loops: LoopStack::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    /// Rebind an existing variable where it is visible, otherwise
    /// define it in the innermost scope.
    pub fn assign(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    pub fn unset(&mut self, name: &str) {
        for scope in self.scopes.iter_mut().rev() {
            if scope.remove(name).is_some() {
                return;
            }
        }
    }

    pub fn push_scope(&mut self, scope: Data) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

/// Executes a compiled template against a data context. Decoupled
/// from the rewrite pipeline; rendering errors out of here propagate
/// unchanged through `render`/`render_string`.
pub trait Executor: Send + Sync {
    fn execute(&self, compiled: &str, data: &Data) -> Result<String>;
}

/// The built-in tree-walking executor.
pub struct Interp;

impl Executor for Interp {
    fn execute(&self, compiled: &str, data: &Data) -> Result<String> {
        let mut ctx = Ctx::new(data.clone());
        interp::run(compiled, &mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScytheError;
    use serde_json::json;

    fn data(v: Value) -> Data {
        v.as_object().unwrap().clone()
    }

    fn exec(compiled: &str, d: Value) -> String {
        Interp.execute(compiled, &data(d)).unwrap()
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(exec("plain <b>text</b>", json!({})), "plain <b>text</b>");
    }

    #[test]
    fn echo_escaped_and_raw() {
        assert_eq!(
            exec("<?scy echo html($x) ?>", json!({"x": "<b>"})),
            "&lt;b&gt;"
        );
        assert_eq!(exec("<?scy echo $x ?>", json!({"x": "<b>"})), "<b>");
    }

    #[test]
    fn echo_default_ternary() {
        let t = "<?scy echo isset($name) ? html($name) : html('anon') ?>";
        assert_eq!(exec(t, json!({"name": "Ian"})), "Ian");
        assert_eq!(exec(t, json!({})), "anon");
        assert_eq!(exec(t, json!({"name": null})), "anon");
    }

    #[test]
    fn variable_paths() {
        let d = json!({"user": {"name": "Gonzo", "tags": ["a", "b"]}});
        assert_eq!(exec("<?scy echo $user.name ?>", d.clone()), "Gonzo");
        assert_eq!(exec("<?scy echo $user.tags[1] ?>", d.clone()), "b");
        assert_eq!(exec("<?scy echo $user['name'] ?>", d), "Gonzo");
    }

    #[test]
    fn if_elseif_else() {
        let t = "<?scy if $n > 10 ?>big<?scy elseif $n > 5 ?>mid<?scy else ?>small<?scy endif ?>";
        assert_eq!(exec(t, json!({"n": 20})), "big");
        assert_eq!(exec(t, json!({"n": 7})), "mid");
        assert_eq!(exec(t, json!({"n": 1})), "small");
    }

    #[test]
    fn foreach_binds_and_iterates() {
        let t = "<?scy foreach $xs as $x ?>[<?scy echo $x ?>]<?scy endforeach ?>";
        assert_eq!(exec(t, json!({"xs": [1, 2, 3]})), "[1][2][3]");
        assert_eq!(exec(t, json!({"xs": []})), "");
    }

    #[test]
    fn foreach_key_value() {
        let t = "<?scy foreach $m as $k => $v ?><?scy echo $k ?>=<?scy echo $v ?>;<?scy endforeach ?>";
        assert_eq!(exec(t, json!({"m": {"a": 1, "b": 2}})), "a=1;b=2;");
    }

    #[test]
    fn loop_properties_across_iterations() {
        let t = "<?scy foreach $xs as $x ?>\
                 <?scy echo $loop.index ?>/<?scy echo $loop.count ?>\
                 <?scy if $loop.first ?>F<?scy endif ?>\
                 <?scy if $loop.last ?>L<?scy endif ?>;\
                 <?scy endforeach ?>";
        assert_eq!(exec(t, json!({"xs": [10, 20, 30]})), "0/3F;1/3;2/3L;");
    }

    #[test]
    fn loop_depth_nested() {
        let t = "<?scy foreach $xs as $x ?><?scy foreach $xs as $y ?>\
                 <?scy echo $loop.depth ?><?scy endforeach ?><?scy endforeach ?>";
        assert_eq!(exec(t, json!({"xs": [1, 2]})), "2222");
    }

    #[test]
    fn loop_query_outside_loop_fails() {
        let err = Interp
            .execute("<?scy echo $loop.index ?>", &Data::new())
            .unwrap_err();
        assert!(matches!(err, ScytheError::NoActiveLoop));
    }

    #[test]
    fn loop_parent_fails() {
        let err = Interp
            .execute(
                "<?scy foreach $xs as $x ?><?scy echo $loop.parent ?><?scy endforeach ?>",
                &data(json!({"xs": [1]})),
            )
            .unwrap_err();
        assert!(matches!(err, ScytheError::LoopParentUnsupported));
    }

    #[test]
    fn for_and_while() {
        assert_eq!(
            exec("<?scy for $i = 0; $i < 3; $i++ ?><?scy echo $i ?><?scy endfor ?>", json!({})),
            "012"
        );
        assert_eq!(
            exec(
                "<?scy $i = 3 ?><?scy while $i > 0 ?><?scy echo $i ?><?scy $i = $i - 1 ?><?scy endwhile ?>",
                json!({})
            ),
            "321"
        );
    }

    #[test]
    fn break_and_continue() {
        assert_eq!(
            exec(
                "<?scy foreach $xs as $x ?><?scy continue if $x == 2 ?><?scy echo $x ?><?scy endforeach ?>",
                json!({"xs": [1, 2, 3]})
            ),
            "13"
        );
        assert_eq!(
            exec(
                "<?scy foreach $xs as $x ?><?scy break if $x == 2 ?><?scy echo $x ?><?scy endforeach ?>",
                json!({"xs": [1, 2, 3]})
            ),
            "1"
        );
    }

    #[test]
    fn break_levels() {
        let t = "<?scy foreach $xs as $x ?><?scy foreach $xs as $y ?>\
                 <?scy break 2 ?>inner<?scy endforeach ?>outer<?scy endforeach ?>end";
        assert_eq!(exec(t, json!({"xs": [1, 2]})), "end");
    }

    #[test]
    fn switch_with_fallthrough_and_default() {
        let t = "<?scy switch $n ?><?scy case 1 ?>one<?scy break ?>\
                 <?scy case 2 ?>two<?scy break ?><?scy default ?>many<?scy endswitch ?>";
        assert_eq!(exec(t, json!({"n": 1})), "one");
        assert_eq!(exec(t, json!({"n": 2})), "two");
        assert_eq!(exec(t, json!({"n": 9})), "many");
    }

    #[test]
    fn assignment_and_unset() {
        assert_eq!(
            exec("<?scy $x = 1 + 2 ?><?scy echo $x ?>", json!({})),
            "3"
        );
        assert_eq!(
            exec(
                "<?scy unset $x ?><?scy echo isset($x) ? 'y' : 'n' ?>",
                json!({"x": 1})
            ),
            "n"
        );
    }

    #[test]
    fn raw_statement_block() {
        // what `@php echo $x; $y = 2 @endphp` compiles to
        assert_eq!(
            exec("<?scy echo $x; $y = 2; echo $y ?>", json!({"x": "a"})),
            "a2"
        );
    }

    #[test]
    fn scoped_bindings() {
        let t = "<?scy scope name = 'inner' ?><?scy echo $name ?><?scy endscope ?>|<?scy echo $name ?>";
        assert_eq!(exec(t, json!({"name": "outer"})), "inner|outer");
    }

    #[test]
    fn newline_swallowing_by_tag_kind() {
        // statement tags swallow the newline that follows them
        assert_eq!(exec("a\n<?scy $x = 1 ?>\nb", json!({})), "a\nb");
        assert_eq!(
            exec("<?scy if $x ?>\nyes\n<?scy endif ?>\nb", json!({"x": true})),
            "yes\nb"
        );
        // echo tags keep it
        assert_eq!(
            exec("a\n<?scy echo $x ?>\nb", json!({"x": "X"})),
            "a\nX\nb"
        );
    }

    #[test]
    fn unbalanced_blocks_are_syntax_errors() {
        let err = Interp
            .execute("<?scy if $x ?>never closed", &Data::new())
            .unwrap_err();
        assert!(matches!(err, ScytheError::Syntax(_)));
        let err = Interp.execute("text <?scy endif ?>", &Data::new()).unwrap_err();
        assert!(matches!(err, ScytheError::Syntax(_)));
    }

    #[test]
    fn mutator_builtins() {
        assert_eq!(exec("<?scy echo upper('ab') ?>", json!({})), "AB");
        assert_eq!(exec("<?scy echo ucfirst('hELLO') ?>", json!({})), "Hello");
        assert_eq!(
            exec("<?scy echo ucwords('the muppet show') ?>", json!({})),
            "The Muppet Show"
        );
        assert_eq!(
            exec("<?scy echo format('%05d', $n) ?>", json!({"n": 42})),
            "00042"
        );
        assert_eq!(
            exec("<?scy echo json($d) ?>", json!({"d": {"a": 1}})),
            "{\"a\":1}"
        );
        assert_eq!(
            exec("<?scy echo wrap('aa bb cc', 5) ?>", json!({})),
            "aa bb\ncc"
        );
    }

    #[test]
    fn count_builtin() {
        assert_eq!(exec("<?scy echo count($xs) ?>", json!({"xs": [1, 2, 3]})), "3");
    }
}
