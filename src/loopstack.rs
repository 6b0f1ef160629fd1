//! Iteration metadata for nested loops, queried from templates as
//! `$loop.index`, `$loop.first` etc. Each render invocation owns one
//! stack inside its execution context; nothing here is shared or
//! static, so concurrent renders cannot see each other's frames.

use serde_json::Value;

use crate::error::{Result, ScytheError};

/// One active loop: its cardinality and zero-based progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopFrame {
    pub count: usize,
    pub index: usize,
}

/// Innermost frame on top. All property accessors read the top frame
/// and fail with "no active loop" when the stack is empty.
#[derive(Debug, Default)]
pub struct LoopStack {
    frames: Vec<LoopFrame>,
}

impl LoopStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, count: usize) {
        self.frames.push(LoopFrame { count, index: 0 });
    }

    pub fn increment(&mut self) -> Result<()> {
        let top = self.frames.last_mut().ok_or(ScytheError::NoActiveLoop)?;
        top.index += 1;
        Ok(())
    }

    pub fn end(&mut self) {
        self.frames.pop();
    }

    fn top(&self) -> Result<&LoopFrame> {
        self.frames.last().ok_or(ScytheError::NoActiveLoop)
    }

    pub fn index(&self) -> Result<usize> {
        Ok(self.top()?.index)
    }

    pub fn iteration(&self) -> Result<usize> {
        Ok(self.top()?.index + 1)
    }

    pub fn first(&self) -> Result<bool> {
        Ok(self.top()?.index == 0)
    }

    pub fn last(&self) -> Result<bool> {
        let top = self.top()?;
        Ok(top.index + 1 == top.count)
    }

    pub fn remaining(&self) -> Result<usize> {
        let top = self.top()?;
        Ok(top.count - top.index - 1)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.top()?.count)
    }

    /// 1 = innermost-only context.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Property lookup as used by the expression evaluator.
    pub fn property(&self, name: &str) -> Result<Value> {
        match name {
            "index" => Ok(Value::from(self.index()? as u64)),
            "iteration" => Ok(Value::from(self.iteration()? as u64)),
            "first" => Ok(Value::from(self.first()?)),
            "last" => Ok(Value::from(self.last()?)),
            "remaining" => Ok(Value::from(self.remaining()? as u64)),
            "count" => Ok(Value::from(self.count()? as u64)),
            "depth" => Ok(Value::from(self.depth() as u64)),
            "parent" => Err(ScytheError::LoopParentUnsupported),
            other => Err(ScytheError::Exec(format!(
                "unknown loop property '{other}'"
            ))),
        }
    }
}

#[test]
fn t_loop_stack() {
    let mut l = LoopStack::new();
    assert!(matches!(l.index(), Err(ScytheError::NoActiveLoop)));
    l.start(3);
    assert_eq!(l.index().unwrap(), 0);
    assert_eq!(l.iteration().unwrap(), 1);
    assert!(l.first().unwrap());
    assert!(!l.last().unwrap());
    assert_eq!(l.remaining().unwrap(), 2);
    assert_eq!(l.count().unwrap(), 3);
    assert_eq!(l.depth(), 1);
    l.increment().unwrap();
    l.increment().unwrap();
    assert!(l.last().unwrap());
    assert_eq!(l.remaining().unwrap(), 0);
    l.end();
    assert!(matches!(l.count(), Err(ScytheError::NoActiveLoop)));
}

#[test]
fn t_loop_stack_nesting() {
    let mut l = LoopStack::new();
    l.start(2);
    l.increment().unwrap();
    l.start(5);
    // accessors always read the innermost frame
    assert_eq!(l.count().unwrap(), 5);
    assert_eq!(l.index().unwrap(), 0);
    assert_eq!(l.depth(), 2);
    l.end();
    assert_eq!(l.count().unwrap(), 2);
    assert_eq!(l.index().unwrap(), 1);
}

#[test]
fn t_loop_parent_fails() {
    let mut l = LoopStack::new();
    l.start(1);
    assert!(matches!(
        l.property("parent"),
        Err(ScytheError::LoopParentUnsupported)
    ));
}
