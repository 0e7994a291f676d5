use std::fmt;
use std::sync::Arc;

use super::environment::{Environment, SavedFrame};
use crate::error::Fault;
use crate::value::Value;

pub type Continue<'a> = dyn FnMut(&mut Environment) -> Result<Value, Fault> + 'a;

pub trait Step: Send + Sync + fmt::Debug {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault>;

    /// Re-enters a step that was suspended somewhere inside its nested blocks.
    /// `inner` finishes the suspended nested block.
    fn resume(&self, env: &mut Environment, inner: &mut Continue<'_>) -> Result<Value, Fault> {
        inner(env)
    }
}

#[derive(Debug)]
pub struct LinkedStep {
    pub line: usize,
    pub step: Box<dyn Step>,
}

#[derive(Debug)]
struct BlockInner {
    name: Option<String>,
    steps: Vec<LinkedStep>,
}

/// Linked operation chain; cheap to clone.
#[derive(Clone)]
pub struct Block(Arc<BlockInner>);

impl Block {
    pub fn new(name: Option<String>, steps: Vec<LinkedStep>) -> Self {
        Self(Arc::new(BlockInner { name, steps }))
    }

    pub fn empty() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.0.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.steps.is_empty()
    }

    pub fn first_line(&self) -> usize {
        self.0.steps.first().map(|step| step.line).unwrap_or(0)
    }

    fn step(&self, index: usize) -> Result<&LinkedStep, Fault> {
        self.0.steps.get(index).ok_or_else(|| {
            Fault::engine(
                "ENGINE_RESUME_INDEX",
                format!("Saved step index {} is outside the block.", index),
            )
        })
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.0.name)
            .field("steps", &self.0.steps.len())
            .finish()
    }
}

pub fn evaluate(block: &Block, env: &mut Environment) -> Result<Value, Fault> {
    run_from(block, 0, env)
}

/// Runs `block` from `start` inside its own statement frame.
///
/// Stops at the first non-normal signal. A suspending signal records the
/// position so a later call can resume right after it.
pub(crate) fn run_from(block: &Block, start: usize, env: &mut Environment) -> Result<Value, Fault> {
    if !env.is_normal() {
        return Ok(Value::empty());
    }
    env.create_frame();
    let mark = env.frame_depth();
    let mut last = Value::empty();
    for (index, linked) in block.0.steps.iter().enumerate().skip(start) {
        if linked.line > 0 {
            env.set_line(linked.line);
        }
        match linked.step.evaluate(env) {
            Ok(value) => last = value,
            Err(fault) => {
                env.clean_to(mark - 1);
                return Err(fault.or_line(linked.line));
            }
        }
        if !env.is_normal() {
            if env.signal().is_suspending() {
                env.record_suspension(block.clone(), index);
            }
            break;
        }
    }
    env.clean_to(mark - 1);
    Ok(last)
}

/// Resumes saved positions, outermost first.
pub(crate) fn resume_frames(frames: &[SavedFrame], env: &mut Environment) -> Result<Value, Fault> {
    let Some((saved, inner)) = frames.split_first() else {
        return Ok(Value::empty());
    };
    if !inner.is_empty() {
        let linked = saved.block.step(saved.index)?;
        if linked.line > 0 {
            env.set_line(linked.line);
        }
        linked
            .step
            .resume(env, &mut |env: &mut Environment| resume_frames(inner, env))
            .map_err(|fault| fault.or_line(linked.line))?;
        if env.signal().is_suspending() {
            env.record_suspension(saved.block.clone(), saved.index);
            return Ok(Value::empty());
        }
    }
    run_from(&saved.block, saved.index + 1, env)
}
