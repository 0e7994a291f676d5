use regex::Regex;
use strand_core::{ir, Flow, Op, StrandError, VarScope};

use super::step::{Block, LinkedStep, Step};
use super::steps::{self, TemplatePart};
use crate::value::Value;

/// Builds executable steps for each IR operation.
///
/// Every method has the plain implementation as its default, so a factory
/// only overrides the operations it decorates.
pub trait StepFactory: Send + Sync {
    fn create_frame(&self) -> Box<dyn Step> {
        Box::new(steps::CreateFrame)
    }

    fn literal(&self, value: Value) -> Box<dyn Step> {
        Box::new(steps::Literal { value })
    }

    fn template(&self, parts: Vec<TemplatePart>) -> Box<dyn Step> {
        Box::new(steps::Template { parts })
    }

    fn get(&self, name: String) -> Box<dyn Step> {
        Box::new(steps::Get { name })
    }

    fn assign(&self, name: String, scope: VarScope) -> Box<dyn Step> {
        Box::new(steps::Assign { name, scope })
    }

    fn index(&self) -> Box<dyn Step> {
        Box::new(steps::Index)
    }

    fn assign_index(&self) -> Box<dyn Step> {
        Box::new(steps::AssignIndex)
    }

    fn operate(&self, operator: String) -> Box<dyn Step> {
        Box::new(steps::Operate { operator })
    }

    fn decide(&self, condition: Block, then: Block, otherwise: Option<Block>) -> Box<dyn Step> {
        Box::new(steps::Decide {
            condition,
            then,
            otherwise,
        })
    }

    fn goto(&self, condition: Block, body: Block, increment: Option<Block>) -> Box<dyn Step> {
        Box::new(steps::Goto {
            condition,
            body,
            increment,
        })
    }

    fn iterate_create(&self, key: Option<String>, value: String) -> Box<dyn Step> {
        Box::new(steps::IterateCreate { key, value })
    }

    fn iterate_next(&self) -> Box<dyn Step> {
        Box::new(steps::IterateNext)
    }

    fn iterate_destroy(&self) -> Box<dyn Step> {
        Box::new(steps::IterateDestroy)
    }

    fn create_closure(&self, params: Vec<String>, body: Block) -> Box<dyn Step> {
        Box::new(steps::CreateClosure { params, body })
    }

    fn bind(&self, function: String, params: Vec<String>, body: Block) -> Box<dyn Step> {
        Box::new(steps::Bind {
            function,
            params,
            body,
        })
    }

    fn bind_inline(&self, function: String, body: Block) -> Box<dyn Step> {
        Box::new(steps::BindInline { function, body })
    }

    fn call(&self, function: String) -> Box<dyn Step> {
        Box::new(steps::Call { function })
    }

    fn object_new(&self, class: String) -> Box<dyn Step> {
        Box::new(steps::ObjectNew { class })
    }

    fn object_access(&self, method: String) -> Box<dyn Step> {
        Box::new(steps::ObjectAccess { method })
    }

    fn flow(&self, flow: Flow) -> Box<dyn Step> {
        Box::new(steps::Return { flow })
    }

    fn try_catch(&self, body: Block, handler: Block, var: String) -> Box<dyn Step> {
        Box::new(steps::Try { body, handler, var })
    }

    fn pop_try(&self) -> Box<dyn Step> {
        Box::new(steps::PopTry)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeneratedSteps;

impl StepFactory for GeneratedSteps {}

pub struct Linker<'a> {
    factory: &'a dyn StepFactory,
    slot_pattern: Regex,
}

impl<'a> Linker<'a> {
    pub fn new(factory: &'a dyn StepFactory) -> Result<Self, StrandError> {
        let slot_pattern = Regex::new(r"\$\{([^{}]+)\}").map_err(|error| {
            StrandError::new("ENGINE_LINK_TEMPLATE", format!("Bad slot pattern: {}", error))
        })?;
        Ok(Self {
            factory,
            slot_pattern,
        })
    }

    pub fn link(&self, block: &ir::Block) -> Result<Block, StrandError> {
        let mut linked = Vec::with_capacity(block.steps.len());
        for node in &block.steps {
            self.link_node(node, &mut linked)?;
        }
        Ok(Block::new(block.name.clone(), linked))
    }

    fn link_optional(&self, block: &Option<ir::Block>) -> Result<Option<Block>, StrandError> {
        block.as_ref().map(|block| self.link(block)).transpose()
    }

    fn link_node(&self, node: &ir::StepNode, out: &mut Vec<LinkedStep>) -> Result<(), StrandError> {
        let line = node.line;
        let factory = self.factory;
        let step = match &node.op {
            Op::CreateFrame => factory.create_frame(),
            Op::Literal { value } => factory.literal(Value::from(value.clone())),
            Op::Template { text } => {
                self.expand_template(text, line, out)?;
                return Ok(());
            }
            Op::Get { name } => factory.get(checked_name(name, "get", line)?),
            Op::Assign { name, scope } => factory.assign(checked_name(name, "assign", line)?, *scope),
            Op::Index => factory.index(),
            Op::AssignIndex => factory.assign_index(),
            Op::Operate { operator } => factory.operate(checked_name(operator, "operate", line)?),
            Op::Decide {
                condition,
                then,
                otherwise,
            } => factory.decide(
                self.link(condition)?,
                self.link(then)?,
                self.link_optional(otherwise)?,
            ),
            Op::Goto {
                condition,
                body,
                increment,
            } => factory.goto(
                self.link(condition)?,
                self.link(body)?,
                self.link_optional(increment)?,
            ),
            Op::IterateCreate { key, value } => {
                factory.iterate_create(key.clone(), checked_name(value, "iterate", line)?)
            }
            Op::IterateNext => factory.iterate_next(),
            Op::IterateDestroy => factory.iterate_destroy(),
            Op::CreateClosure { params, body } => {
                factory.create_closure(params.clone(), self.link(body)?)
            }
            Op::Bind {
                function,
                params,
                body,
            } => factory.bind(
                checked_name(function, "bind", line)?,
                params.clone(),
                self.link(body)?,
            ),
            Op::BindInline { function, body } => {
                factory.bind_inline(checked_name(function, "bindInline", line)?, self.link(body)?)
            }
            Op::Call { function } => factory.call(checked_name(function, "call", line)?),
            Op::ObjectNew { class } => factory.object_new(checked_name(class, "objectNew", line)?),
            Op::ObjectAccess { method } => {
                factory.object_access(checked_name(method, "objectAccess", line)?)
            }
            Op::Return { flow } => factory.flow(*flow),
            Op::Try { body, handler, var } => factory.try_catch(
                self.link(body)?,
                self.link(handler)?,
                checked_name(var, "try", line)?,
            ),
            Op::PopTry => factory.pop_try(),
        };
        out.push(LinkedStep { line, step });
        Ok(())
    }

    /// `"a ${$x} b"` becomes `CreateFrame, Get $x, Template[a , slot, b]`.
    fn expand_template(
        &self,
        text: &str,
        line: usize,
        out: &mut Vec<LinkedStep>,
    ) -> Result<(), StrandError> {
        let mut parts = Vec::new();
        let mut names = Vec::new();
        let mut cursor = 0usize;
        for captures in self.slot_pattern.captures_iter(text) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > cursor {
                parts.push(TemplatePart::Text(text[cursor..whole.start()].to_string()));
            }
            parts.push(TemplatePart::Slot);
            names.push(checked_name(name.as_str().trim(), "template", line)?);
            cursor = whole.end();
        }
        if cursor < text.len() {
            parts.push(TemplatePart::Text(text[cursor..].to_string()));
        }

        out.push(LinkedStep {
            line,
            step: self.factory.create_frame(),
        });
        for name in names.into_iter().rev() {
            out.push(LinkedStep {
                line,
                step: self.factory.get(name),
            });
        }
        out.push(LinkedStep {
            line,
            step: self.factory.template(parts),
        });
        Ok(())
    }
}

fn checked_name(name: &str, op: &str, line: usize) -> Result<String, StrandError> {
    if name.trim().is_empty() {
        return Err(StrandError::at_line(
            "ENGINE_LINK_NAME_EMPTY",
            format!("Operation \"{}\" needs a non-empty name.", op),
            line,
        ));
    }
    Ok(name.to_string())
}
