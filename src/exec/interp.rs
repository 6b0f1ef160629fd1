//! Interpreter for the executable form: splits compiled text into
//! literal pieces and `<?scy .. ?>` instruction tags, builds a block
//! tree, and walks it against an execution context. Unbalanced
//! control tags surface here as syntax errors; this is where
//! malformed directives that passed through compilation finally fail.

use serde_json::Value;

use crate::error::{Result, ScytheError};
use crate::scan::{split_keyword, split_top_level, tag_end};

use super::expr::{eval, to_display, truthy, Expr};
use super::expr::loose_eq;
use super::Ctx;

const TAG_OPEN: &str = "<?scy";
const TAG_CLOSE: &str = "?>";

fn syntax(msg: impl Into<String>) -> ScytheError {
    ScytheError::Syntax(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Echo(Expr),
    Assign(String, Expr),
    Unset(String),
    Incr(String, i64),
    Break { levels: usize, cond: Option<Expr> },
    Continue { cond: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
enum TagOp {
    Stmts(Vec<Stmt>),
    If(Expr),
    ElseIf(Expr),
    Else,
    EndIf,
    Foreach { items: Expr, key: Option<String>, var: String },
    EndForeach,
    For { init: Stmt, cond: Expr, step: Stmt },
    EndFor,
    While(Expr),
    EndWhile,
    Switch(Expr),
    Case(Expr),
    Default,
    EndSwitch,
    Scope(Vec<(String, Expr)>),
    EndScope,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Stmts(Vec<Stmt>),
    If {
        arms: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Foreach {
        items: Expr,
        key: Option<String>,
        var: String,
        body: Vec<Node>,
    },
    For {
        init: Stmt,
        cond: Expr,
        step: Stmt,
        body: Vec<Node>,
    },
    While {
        cond: Expr,
        body: Vec<Node>,
    },
    Switch {
        subject: Expr,
        arms: Vec<(Option<Expr>, Vec<Node>)>,
    },
    Scope {
        binds: Vec<(String, Expr)>,
        body: Vec<Node>,
    },
}

enum Item {
    Text(String),
    Op(TagOp),
}

// ------------------------------------------------------------------
// Lexing and statement parsing

fn lex(compiled: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut pos = 0;
    while let Some(rel) = compiled[pos..].find(TAG_OPEN) {
        let start = pos + rel;
        if start > pos {
            items.push(Item::Text(compiled[pos..start].to_string()));
        }
        let body_start = start + TAG_OPEN.len();
        let close = tag_end(compiled, body_start)
            .ok_or_else(|| syntax("unterminated instruction tag"))?;
        let op = parse_tag(compiled[body_start..close].trim())?;
        let swallow = swallows_newline(&op);
        items.push(Item::Op(op));
        pos = close + TAG_CLOSE.len();
        // one newline directly after a non-printing tag is swallowed,
        // so block tags on their own lines leave no blank output
        // lines; echo tags keep it, the author wrote output there
        if swallow {
            if compiled[pos..].starts_with("\r\n") {
                pos += 2;
            } else if compiled[pos..].starts_with('\n') {
                pos += 1;
            }
        }
    }
    if pos < compiled.len() {
        items.push(Item::Text(compiled[pos..].to_string()));
    }
    Ok(items)
}

fn swallows_newline(op: &TagOp) -> bool {
    match op {
        TagOp::Stmts(stmts) => !stmts.iter().any(|s| matches!(s, Stmt::Echo(_))),
        _ => true,
    }
}

fn head<'t>(tag: &'t str) -> (&'t str, &'t str) {
    match tag.find(|c: char| c.is_ascii_whitespace()) {
        Some(i) => (&tag[..i], tag[i..].trim()),
        None => (tag, ""),
    }
}

fn parse_tag(tag: &str) -> Result<TagOp> {
    let (word, rest) = head(tag);
    Ok(match word {
        "if" => TagOp::If(Expr::parse(rest)?),
        "elseif" => TagOp::ElseIf(Expr::parse(rest)?),
        "else" => TagOp::Else,
        "endif" => TagOp::EndIf,
        "foreach" => {
            let (items, var) = split_keyword(rest, "as")
                .ok_or_else(|| syntax(format!("malformed foreach head '{rest}'")))?;
            let (key, var) = match var.split_once("=>") {
                Some((k, v)) => (Some(var_name(k)?), var_name(v)?),
                None => (None, var_name(var)?),
            };
            TagOp::Foreach {
                items: Expr::parse(items)?,
                key,
                var,
            }
        }
        "endforeach" => TagOp::EndForeach,
        "for" => {
            let parts = split_top_level(rest, ';');
            if parts.len() != 3 {
                return Err(syntax(format!("malformed for head '{rest}'")));
            }
            TagOp::For {
                init: parse_stmt(parts[0].trim())?,
                cond: Expr::parse(parts[1].trim())?,
                step: parse_stmt(parts[2].trim())?,
            }
        }
        "endfor" => TagOp::EndFor,
        "while" => TagOp::While(Expr::parse(rest)?),
        "endwhile" => TagOp::EndWhile,
        "switch" => TagOp::Switch(Expr::parse(rest)?),
        "case" => TagOp::Case(Expr::parse(rest)?),
        "default" => TagOp::Default,
        "endswitch" => TagOp::EndSwitch,
        "break" => {
            if rest.is_empty() {
                TagOp::Stmts(vec![Stmt::Break { levels: 1, cond: None }])
            } else if let Ok(n) = rest.parse::<usize>() {
                TagOp::Stmts(vec![Stmt::Break { levels: n.max(1), cond: None }])
            } else if let Some(cond) = rest.strip_prefix("if ") {
                TagOp::Stmts(vec![Stmt::Break {
                    levels: 1,
                    cond: Some(Expr::parse(cond)?),
                }])
            } else {
                return Err(syntax(format!("malformed break '{tag}'")));
            }
        }
        "continue" => {
            if rest.is_empty() {
                TagOp::Stmts(vec![Stmt::Continue { cond: None }])
            } else if let Some(cond) = rest.strip_prefix("if ") {
                TagOp::Stmts(vec![Stmt::Continue {
                    cond: Some(Expr::parse(cond)?),
                }])
            } else {
                return Err(syntax(format!("malformed continue '{tag}'")));
            }
        }
        "scope" => {
            let mut binds = Vec::new();
            for part in split_top_level(rest, ',') {
                let (name, value) = split_assign(part)
                    .ok_or_else(|| syntax(format!("malformed scope binding '{part}'")))?;
                binds.push((var_name(name)?, Expr::parse(value.trim())?));
            }
            TagOp::Scope(binds)
        }
        "endscope" => TagOp::EndScope,
        _ => TagOp::Stmts(parse_stmts(tag)?),
    })
}

fn var_name(s: &str) -> Result<String> {
    let s = s.trim();
    let name = s.strip_prefix('$').unwrap_or(s);
    if name.is_empty() || !name.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_') {
        return Err(syntax(format!("bad variable name '{s}'")));
    }
    Ok(name.to_string())
}

/// A `;`-separated statement list, as found in raw `@php` blocks and
/// in assignment tags.
fn parse_stmts(src: &str) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();
    for part in split_top_level(src, ';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        stmts.push(parse_stmt(part)?);
    }
    Ok(stmts)
}

fn parse_stmt(src: &str) -> Result<Stmt> {
    let (word, rest) = head(src);
    if word == "echo" {
        return Ok(Stmt::Echo(Expr::parse(rest)?));
    }
    if word == "unset" {
        return Ok(Stmt::Unset(var_name(rest)?));
    }
    if let Some(name) = src.strip_suffix("++") {
        return Ok(Stmt::Incr(var_name(name)?, 1));
    }
    if let Some(name) = src.strip_suffix("--") {
        return Ok(Stmt::Incr(var_name(name)?, -1));
    }
    if let Some((lhs, rhs)) = split_assign(src) {
        return Ok(Stmt::Assign(var_name(lhs)?, Expr::parse(rhs.trim())?));
    }
    Err(syntax(format!("cannot parse statement '{src}'")))
}

/// Split at a top-level `=` that is an assignment, not part of
/// `==`, `!=`, `<=` or `>=`.
fn split_assign(src: &str) -> Option<(&str, &str)> {
    let bytes = src.as_bytes();
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
                b'=' if depth == 0 => {
                    let prev = i.checked_sub(1).map(|p| bytes[p]);
                    let next = bytes.get(i + 1).copied();
                    if next != Some(b'=')
                        && !matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>'))
                    {
                        return Some((&src[..i], &src[i + 1..]));
                    }
                    if next == Some(b'=') {
                        i += 1;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

// ------------------------------------------------------------------
// Block tree construction

struct TreeBuilder {
    items: Vec<Item>,
    pos: usize,
}

impl TreeBuilder {
    /// Parse nodes until one of `enders` (or end of input when the
    /// slice is empty). Returns the nodes and the ender op found.
    fn nodes(&mut self, enders: &[&str]) -> Result<(Vec<Node>, Option<TagOp>)> {
        let mut out = Vec::new();
        while self.pos < self.items.len() {
            let item = std::mem::replace(&mut self.items[self.pos], Item::Text(String::new()));
            self.pos += 1;
            match item {
                Item::Text(t) => out.push(Node::Text(t)),
                Item::Op(op) => {
                    if enders.contains(&op_keyword(&op)) {
                        return Ok((out, Some(op)));
                    }
                    out.push(self.node(op)?);
                }
            }
        }
        if enders.is_empty() {
            Ok((out, None))
        } else {
            Err(syntax(format!(
                "missing closing tag, expected one of {enders:?}"
            )))
        }
    }

    fn node(&mut self, op: TagOp) -> Result<Node> {
        Ok(match op {
            TagOp::Stmts(s) => Node::Stmts(s),
            TagOp::If(cond) => {
                let mut arms = Vec::new();
                let mut otherwise = None;
                let mut current = cond;
                loop {
                    let (body, ender) = self.nodes(&["elseif", "else", "endif"])?;
                    match ender.unwrap() {
                        TagOp::ElseIf(next) => {
                            arms.push((current, body));
                            current = next;
                        }
                        TagOp::Else => {
                            arms.push((current, body));
                            let (rest, _) = self.nodes(&["endif"])?;
                            otherwise = Some(rest);
                            break;
                        }
                        TagOp::EndIf => {
                            arms.push((current, body));
                            break;
                        }
                        _ => unreachable!(),
                    }
                }
                Node::If { arms, otherwise }
            }
            TagOp::Foreach { items, key, var } => {
                let (body, _) = self.nodes(&["endforeach"])?;
                Node::Foreach { items, key, var, body }
            }
            TagOp::For { init, cond, step } => {
                let (body, _) = self.nodes(&["endfor"])?;
                Node::For { init, cond, step, body }
            }
            TagOp::While(cond) => {
                let (body, _) = self.nodes(&["endwhile"])?;
                Node::While { cond, body }
            }
            TagOp::Switch(subject) => {
                let mut arms: Vec<(Option<Expr>, Vec<Node>)> = Vec::new();
                // skip any literal text before the first case
                let (_, mut ender) = self.nodes(&["case", "default", "endswitch"])?;
                loop {
                    match ender.unwrap() {
                        TagOp::Case(e) => {
                            let (body, next) =
                                self.nodes(&["case", "default", "endswitch"])?;
                            arms.push((Some(e), body));
                            ender = next;
                        }
                        TagOp::Default => {
                            let (body, next) =
                                self.nodes(&["case", "default", "endswitch"])?;
                            arms.push((None, body));
                            ender = next;
                        }
                        TagOp::EndSwitch => break,
                        _ => unreachable!(),
                    }
                }
                Node::Switch { subject, arms }
            }
            TagOp::Scope(binds) => {
                let (body, _) = self.nodes(&["endscope"])?;
                Node::Scope { binds, body }
            }
            other => {
                return Err(syntax(format!(
                    "unexpected '{}' tag without a matching opener",
                    op_keyword(&other)
                )))
            }
        })
    }
}

fn op_keyword(op: &TagOp) -> &'static str {
    match op {
        TagOp::Stmts(_) => "",
        TagOp::If(_) => "if",
        TagOp::ElseIf(_) => "elseif",
        TagOp::Else => "else",
        TagOp::EndIf => "endif",
        TagOp::Foreach { .. } => "foreach",
        TagOp::EndForeach => "endforeach",
        TagOp::For { .. } => "for",
        TagOp::EndFor => "endfor",
        TagOp::While(_) => "while",
        TagOp::EndWhile => "endwhile",
        TagOp::Switch(_) => "switch",
        TagOp::Case(_) => "case",
        TagOp::Default => "default",
        TagOp::EndSwitch => "endswitch",
        TagOp::Scope(_) => "scope",
        TagOp::EndScope => "endscope",
    }
}

fn parse(compiled: &str) -> Result<Vec<Node>> {
    let mut builder = TreeBuilder {
        items: lex(compiled)?,
        pos: 0,
    };
    let (nodes, _) = builder.nodes(&[])?;
    Ok(nodes)
}

// ------------------------------------------------------------------
// Execution

/// Non-local control flow out of a loop/switch body.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Normal,
    Break(usize),
    Continue,
}

pub fn run(compiled: &str, ctx: &mut Ctx) -> Result<String> {
    let nodes = parse(compiled)?;
    let mut out = String::new();
    let flow = exec_nodes(&nodes, ctx, &mut out)?;
    match flow {
        Flow::Normal => Ok(out),
        _ => Err(ScytheError::Exec(
            "break or continue outside of a loop".into(),
        )),
    }
}

fn exec_nodes(nodes: &[Node], ctx: &mut Ctx, out: &mut String) -> Result<Flow> {
    for node in nodes {
        let flow = exec_node(node, ctx, out)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn exec_node(node: &Node, ctx: &mut Ctx, out: &mut String) -> Result<Flow> {
    match node {
        Node::Text(t) => {
            out.push_str(t);
            Ok(Flow::Normal)
        }
        Node::Stmts(stmts) => exec_stmts(stmts, ctx, out),
        Node::If { arms, otherwise } => {
            for (cond, body) in arms {
                if truthy(&eval(cond, ctx)?) {
                    return exec_nodes(body, ctx, out);
                }
            }
            match otherwise {
                Some(body) => exec_nodes(body, ctx, out),
                None => Ok(Flow::Normal),
            }
        }
        Node::Foreach { items, key, var, body } => {
            let entries = iterate(&eval(items, ctx)?)?;
            ctx.loops.start(entries.len());
            let mut result = Flow::Normal;
            for (k, v) in entries {
                if let Some(key) = key {
                    ctx.assign(key, k);
                }
                ctx.assign(var, v);
                match exec_nodes(body, ctx, out)? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break(1) => break,
                    Flow::Break(n) => {
                        result = Flow::Break(n - 1);
                        break;
                    }
                }
                ctx.loops.increment()?;
            }
            ctx.loops.end();
            Ok(result)
        }
        Node::For { init, cond, step, body } => {
            let mut sink = String::new();
            exec_stmts(std::slice::from_ref(init), ctx, &mut sink)?;
            let mut result = Flow::Normal;
            while truthy(&eval(cond, ctx)?) {
                match exec_nodes(body, ctx, out)? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break(1) => break,
                    Flow::Break(n) => {
                        result = Flow::Break(n - 1);
                        break;
                    }
                }
                exec_stmts(std::slice::from_ref(step), ctx, &mut sink)?;
            }
            Ok(result)
        }
        Node::While { cond, body } => {
            let mut result = Flow::Normal;
            while truthy(&eval(cond, ctx)?) {
                match exec_nodes(body, ctx, out)? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break(1) => break,
                    Flow::Break(n) => {
                        result = Flow::Break(n - 1);
                        break;
                    }
                }
            }
            Ok(result)
        }
        Node::Switch { subject, arms } => {
            let subject = eval(subject, ctx)?;
            // first matching case, falling back to default
            let mut matched = None;
            for (i, (case, _)) in arms.iter().enumerate() {
                if let Some(e) = case {
                    if loose_eq(&subject, &eval(e, ctx)?) {
                        matched = Some(i);
                        break;
                    }
                }
            }
            if matched.is_none() {
                matched = arms.iter().position(|(case, _)| case.is_none());
            }
            if let Some(start) = matched {
                // fall through until a break
                for (_, body) in &arms[start..] {
                    match exec_nodes(body, ctx, out)? {
                        Flow::Normal => {}
                        Flow::Break(1) => break,
                        Flow::Break(n) => return Ok(Flow::Break(n - 1)),
                        Flow::Continue => return Ok(Flow::Continue),
                    }
                }
            }
            Ok(Flow::Normal)
        }
        Node::Scope { binds, body } => {
            let mut scope = serde_json::Map::new();
            for (name, expr) in binds {
                scope.insert(name.clone(), eval(expr, ctx)?);
            }
            ctx.push_scope(scope);
            let flow = exec_nodes(body, ctx, out);
            ctx.pop_scope();
            flow
        }
    }
}

fn exec_stmts(stmts: &[Stmt], ctx: &mut Ctx, out: &mut String) -> Result<Flow> {
    for stmt in stmts {
        match stmt {
            Stmt::Echo(e) => {
                let v = eval(e, ctx)?;
                out.push_str(&to_display(&v)?);
            }
            Stmt::Assign(name, e) => {
                let v = eval(e, ctx)?;
                ctx.assign(name, v);
            }
            Stmt::Unset(name) => ctx.unset(name),
            Stmt::Incr(name, by) => {
                let current = ctx
                    .lookup(name)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                ctx.assign(name, Value::from(current + by));
            }
            Stmt::Break { levels, cond } => {
                let fire = match cond {
                    Some(e) => truthy(&eval(e, ctx)?),
                    None => true,
                };
                if fire {
                    return Ok(Flow::Break(*levels));
                }
            }
            Stmt::Continue { cond } => {
                let fire = match cond {
                    Some(e) => truthy(&eval(e, ctx)?),
                    None => true,
                };
                if fire {
                    return Ok(Flow::Continue);
                }
            }
        }
    }
    Ok(Flow::Normal)
}

/// Entries of an iterable value: arrays yield index keys, objects
/// their string keys.
fn iterate(v: &Value) -> Result<Vec<(Value, Value)>> {
    match v {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i as u64), v.clone()))
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect()),
        Value::Null => Ok(Vec::new()),
        _ => Err(ScytheError::Exec(
            "foreach over a non-iterable value".into(),
        )),
    }
}
