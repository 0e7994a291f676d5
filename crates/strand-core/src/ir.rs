//! Serialized operation chains.
//!
//! A program is a tree of [`Block`]s; each block is a chain of [`StepNode`]s
//! that the runtime links into executable steps. Operands are passed through
//! frames: a `CreateFrame` step opens one, operand steps push onto it in
//! reverse parameter order, and the consuming step (`Call`, `Operate`, ...)
//! pops them in parameter order and leaves its result on the enclosing frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub source_file: Option<String>,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepNode>,
}

impl Block {
    pub fn new(steps: Vec<StepNode>) -> Self {
        Self { name: None, steps }
    }

    pub fn named(name: impl Into<String>, steps: Vec<StepNode>) -> Self {
        Self {
            name: Some(name.into()),
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    #[serde(default)]
    pub line: usize,
    #[serde(flatten)]
    pub op: Op,
}

impl StepNode {
    pub fn new(line: usize, op: Op) -> Self {
        Self { line, op }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Empty,
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VarScope {
    /// Existing local, then closure, then global binding; new names go global.
    #[default]
    Auto,
    Local,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Flow {
    #[default]
    Return,
    Throw,
    Break,
    Continue,
    Callcc,
    Yield,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Op {
    CreateFrame,
    Literal {
        value: Literal,
    },
    /// Text with `${name}` slots, expanded by the linker.
    Template {
        text: String,
    },
    Get {
        name: String,
    },
    Assign {
        name: String,
        #[serde(default)]
        scope: VarScope,
    },
    Index,
    AssignIndex,
    Operate {
        operator: String,
    },
    Decide {
        condition: Block,
        then: Block,
        #[serde(default)]
        otherwise: Option<Block>,
    },
    Goto {
        condition: Block,
        body: Block,
        #[serde(default)]
        increment: Option<Block>,
    },
    IterateCreate {
        #[serde(default)]
        key: Option<String>,
        value: String,
    },
    IterateNext,
    IterateDestroy,
    CreateClosure {
        #[serde(default)]
        params: Vec<String>,
        body: Block,
    },
    Bind {
        function: String,
        #[serde(default)]
        params: Vec<String>,
        body: Block,
    },
    BindInline {
        function: String,
        body: Block,
    },
    Call {
        function: String,
    },
    ObjectNew {
        class: String,
    },
    ObjectAccess {
        method: String,
    },
    Return {
        #[serde(default)]
        flow: Flow,
    },
    Try {
        body: Block,
        handler: Block,
        var: String,
    },
    PopTry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_nodes_flatten_kind_and_line() {
        let node = StepNode::new(
            4,
            Op::Call {
                function: "println".to_string(),
            },
        );
        let json = serde_json::to_value(&node).expect("json");
        assert_eq!(json["kind"], "call");
        assert_eq!(json["line"], 4);
        assert_eq!(json["function"], "println");
    }

    #[test]
    fn program_parses_from_json_with_defaults() {
        let program: Program = serde_json::from_str(
            r#"{
                "name": "main",
                "block": { "steps": [
                    { "kind": "createFrame", "line": 1 },
                    { "kind": "literal", "value": 42, "line": 1 },
                    { "kind": "literal", "value": 1.5 },
                    { "kind": "literal", "value": null },
                    { "kind": "assign", "name": "x" },
                    { "kind": "return", "flow": "callcc" }
                ]}
            }"#,
        )
        .expect("program should parse");

        assert_eq!(program.source_file, None);
        let ops = program
            .block
            .steps
            .iter()
            .map(|node| node.op.clone())
            .collect::<Vec<_>>();
        assert_eq!(ops[0], Op::CreateFrame);
        assert_eq!(
            ops[1],
            Op::Literal {
                value: Literal::Integer(42)
            }
        );
        assert_eq!(
            ops[2],
            Op::Literal {
                value: Literal::Float(1.5)
            }
        );
        assert_eq!(
            ops[3],
            Op::Literal {
                value: Literal::Empty
            }
        );
        assert_eq!(
            ops[4],
            Op::Assign {
                name: "x".to_string(),
                scope: VarScope::Auto
            }
        );
        assert_eq!(ops[5], Op::Return { flow: Flow::Callcc });
        assert_eq!(program.block.steps[2].line, 0);
    }
}
