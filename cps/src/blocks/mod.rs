//! Evaluation nodes.
//!
//! Blocks live in a flat [`Program`] arena and refer to each other by
//! [`BlockId`]. Every block evaluates as `evaluate(block, env, k) -> Step`
//! and decomposes into sub-evaluations glued together by continuations; no
//! evaluation recurses natively into its children.

pub mod access;
pub mod control;
pub mod exceptions;
pub mod logical;
pub mod operators;
pub mod suspend;
pub mod variables;

use crate::continuation::{Continuation, Step};
use crate::environment::Env;
use crate::error::{EngineError, EngineResult};
use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// `catch (kind var) { body }`; a clause without a kind catches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    #[serde(default)]
    pub kind: Option<String>,
    pub var: String,
    pub body: BlockId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    Constant {
        value: Value,
    },
    LocalVar {
        name: String,
    },
    Declare {
        name: String,
        #[serde(default)]
        init: Option<BlockId>,
    },
    Assign {
        name: String,
        value: BlockId,
    },
    Logical {
        op: LogicalOp,
        lhs: BlockId,
        rhs: BlockId,
    },
    Not {
        operand: BlockId,
    },
    Binary {
        op: BinaryOp,
        lhs: BlockId,
        rhs: BlockId,
    },
    If {
        cond: BlockId,
        then_branch: BlockId,
        #[serde(default)]
        else_branch: Option<BlockId>,
    },
    While {
        cond: BlockId,
        body: BlockId,
    },
    Sequence {
        body: Vec<BlockId>,
    },
    Scope {
        body: BlockId,
    },
    Property {
        receiver: BlockId,
        name: String,
        #[serde(default)]
        attribute: bool,
    },
    SetProperty {
        target: String,
        name: String,
        value: BlockId,
        #[serde(default)]
        attribute: bool,
    },
    Call {
        #[serde(default)]
        receiver: Option<BlockId>,
        method: String,
        #[serde(default)]
        args: Vec<BlockId>,
    },
    Throw {
        value: BlockId,
    },
    Try {
        body: BlockId,
        #[serde(default)]
        catches: Vec<CatchClause>,
        #[serde(default)]
        finally: Option<BlockId>,
    },
    Yield {
        request: BlockId,
    },
}

impl Block {
    /// Blocks this block evaluates, in no particular order.
    pub fn children(&self) -> Vec<BlockId> {
        match self {
            Block::Constant { .. } | Block::LocalVar { .. } => vec![],
            Block::Declare { init, .. } => init.iter().copied().collect(),
            Block::Assign { value, .. } => vec![*value],
            Block::Logical { lhs, rhs, .. } | Block::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Block::Not { operand } => vec![*operand],
            Block::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let mut ids = vec![*cond, *then_branch];
                ids.extend(else_branch.iter().copied());
                ids
            }
            Block::While { cond, body } => vec![*cond, *body],
            Block::Sequence { body } => body.clone(),
            Block::Scope { body } => vec![*body],
            Block::Property { receiver, .. } => vec![*receiver],
            Block::SetProperty { value, .. } => vec![*value],
            Block::Call { receiver, args, .. } => {
                let mut ids: Vec<BlockId> = receiver.iter().copied().collect();
                ids.extend(args.iter().copied());
                ids
            }
            Block::Throw { value } => vec![*value],
            Block::Try {
                body,
                catches,
                finally,
            } => {
                let mut ids = vec![*body];
                ids.extend(catches.iter().map(|c| c.body));
                ids.extend(finally.iter().copied());
                ids
            }
            Block::Yield { request } => vec![*request],
        }
    }
}

/// An immutable arena of blocks plus the block a run starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    blocks: Vec<Block>,
    root: BlockId,
}

impl Program {
    /// Builds a program, rejecting dangling or forward references. A block may
    /// only refer to blocks that precede it, so the arena is acyclic.
    pub fn new(blocks: Vec<Block>, root: BlockId) -> EngineResult<Self> {
        let program = Program { blocks, root };
        program.validate()?;
        Ok(program)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.blocks.is_empty() {
            return Err(EngineError::EmptyProgram);
        }
        let len = self.blocks.len();
        for (index, block) in self.blocks.iter().enumerate() {
            let parent = BlockId(index as u32);
            for child in block.children() {
                if child.0 as usize >= index {
                    return Err(EngineError::BlockOutOfRange {
                        block: child,
                        parent,
                        len,
                    });
                }
            }
        }
        if self.root.0 as usize >= len {
            return Err(EngineError::BlockOutOfRange {
                block: self.root,
                parent: self.root,
                len,
            });
        }
        Ok(())
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    /// Evaluates one block: returns the next step without running it.
    pub fn evaluate(&self, id: BlockId, env: Env, k: Continuation) -> Step {
        let Some(block) = self.block(id) else {
            return Step::thrown(
                k,
                crate::values::Failure::new(
                    crate::values::kinds::ENGINE_FAULT,
                    format!("block {} is outside the program", id),
                ),
            );
        };
        match block {
            Block::Constant { value } => Step::value(k, value.clone()),
            Block::LocalVar { name } => variables::eval_local_var(name, env, k),
            Block::Declare { name, init } => variables::eval_declare(name, *init, env, k),
            Block::Assign { name, value } => variables::eval_assign(name, *value, env, k),
            Block::Logical { op, lhs, rhs } => logical::eval(*op, *lhs, *rhs, env, k),
            Block::Not { operand } => operators::eval_not(*operand, env, k),
            Block::Binary { op, lhs, rhs } => operators::eval_binary(*op, *lhs, *rhs, env, k),
            Block::If {
                cond,
                then_branch,
                else_branch,
            } => control::eval_if(*cond, *then_branch, *else_branch, env, k),
            Block::While { cond, body } => control::eval_while(*cond, *body, env, k),
            Block::Sequence { body } => control::eval_sequence(body, env, k),
            Block::Scope { body } => Step::eval(*body, env.child(), k),
            Block::Property {
                receiver,
                name,
                attribute,
            } => access::eval_property(*receiver, name, *attribute, env, k),
            Block::SetProperty {
                target,
                name,
                value,
                attribute,
            } => access::eval_set_property(target, name, *value, *attribute, env, k),
            Block::Call {
                receiver,
                method,
                args,
            } => access::eval_call(*receiver, method, args, env, k),
            Block::Throw { value } => exceptions::eval_throw(*value, env, k),
            Block::Try {
                body,
                catches,
                finally,
            } => exceptions::eval_try(*body, catches, *finally, env, k),
            Block::Yield { request } => suspend::eval_yield(*request, env, k),
        }
    }
}

/// Appends blocks bottom-up and hands out their ids.
#[derive(Debug, Default)]
pub struct Builder {
    blocks: Vec<Block>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn constant(&mut self, value: impl Into<Value>) -> BlockId {
        self.push(Block::Constant {
            value: value.into(),
        })
    }

    pub fn null(&mut self) -> BlockId {
        self.constant(Value::Null)
    }

    pub fn local(&mut self, name: &str) -> BlockId {
        self.push(Block::LocalVar {
            name: name.to_string(),
        })
    }

    pub fn declare(&mut self, name: &str, init: Option<BlockId>) -> BlockId {
        self.push(Block::Declare {
            name: name.to_string(),
            init,
        })
    }

    pub fn assign(&mut self, name: &str, value: BlockId) -> BlockId {
        self.push(Block::Assign {
            name: name.to_string(),
            value,
        })
    }

    pub fn and(&mut self, lhs: BlockId, rhs: BlockId) -> BlockId {
        self.push(Block::Logical {
            op: LogicalOp::And,
            lhs,
            rhs,
        })
    }

    pub fn or(&mut self, lhs: BlockId, rhs: BlockId) -> BlockId {
        self.push(Block::Logical {
            op: LogicalOp::Or,
            lhs,
            rhs,
        })
    }

    pub fn not(&mut self, operand: BlockId) -> BlockId {
        self.push(Block::Not { operand })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: BlockId, rhs: BlockId) -> BlockId {
        self.push(Block::Binary { op, lhs, rhs })
    }

    pub fn if_else(&mut self, cond: BlockId, then_branch: BlockId, else_branch: Option<BlockId>) -> BlockId {
        self.push(Block::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    pub fn while_loop(&mut self, cond: BlockId, body: BlockId) -> BlockId {
        self.push(Block::While { cond, body })
    }

    pub fn sequence(&mut self, body: Vec<BlockId>) -> BlockId {
        self.push(Block::Sequence { body })
    }

    pub fn scope(&mut self, body: BlockId) -> BlockId {
        self.push(Block::Scope { body })
    }

    pub fn property(&mut self, receiver: BlockId, name: &str) -> BlockId {
        self.push(Block::Property {
            receiver,
            name: name.to_string(),
            attribute: false,
        })
    }

    pub fn set_property(&mut self, target: &str, name: &str, value: BlockId) -> BlockId {
        self.push(Block::SetProperty {
            target: target.to_string(),
            name: name.to_string(),
            value,
            attribute: false,
        })
    }

    /// A call on `receiver`, or on the script itself when `receiver` is `None`.
    pub fn call(&mut self, receiver: Option<BlockId>, method: &str, args: Vec<BlockId>) -> BlockId {
        self.push(Block::Call {
            receiver,
            method: method.to_string(),
            args,
        })
    }

    pub fn throw(&mut self, value: BlockId) -> BlockId {
        self.push(Block::Throw { value })
    }

    pub fn try_catch(&mut self, body: BlockId, catches: Vec<CatchClause>, finally: Option<BlockId>) -> BlockId {
        self.push(Block::Try {
            body,
            catches,
            finally,
        })
    }

    pub fn yield_to_host(&mut self, request: BlockId) -> BlockId {
        self.push(Block::Yield { request })
    }

    pub fn finish(self, root: BlockId) -> EngineResult<Program> {
        Program::new(self.blocks, root)
    }
}

/// Evaluate `block` and hand its value to a frame built from `captured`.
pub(crate) fn then(
    block: BlockId,
    env: Env,
    tag: crate::dispatch::DispatchTag,
    captured: crate::continuation::Captured,
    k: Continuation,
) -> Step {
    let frame = Continuation::frame(tag, env.clone(), captured, k);
    Step::eval(block, env, frame)
}
