// ABOUTME: Statement-at-a-time execution for debugger-style hosts

use crate::ast::Body;
use crate::context::RuntimeContext;
use crate::error::RillError;
use crate::eval::{eval_statement, surface, ExecutionResult};
use crate::value::Value;

/// Drives a program one statement per `step()` call, exposing progress so a
/// host can render debugger UI between steps.
pub struct Stepper<'a> {
    body: &'a Body,
    ctx: RuntimeContext,
    index: usize,
    value: Value,
}

impl<'a> Stepper<'a> {
    pub fn new(body: &'a Body, ctx: RuntimeContext) -> Self {
        Stepper {
            body,
            ctx,
            index: 0,
            value: Value::empty_string(),
        }
    }

    /// Execute the next statement. `Ok(None)` once the program is finished.
    pub fn step(&mut self) -> Result<Option<Value>, RillError> {
        let Some(stmt) = self.body.statements.get(self.index) else {
            return Ok(None);
        };
        match eval_statement(stmt, self.index, &mut self.ctx) {
            Ok(value) => {
                self.ctx.pipe_value = value.clone();
                self.value = value.clone();
                self.index += 1;
                Ok(Some(value))
            }
            Err(flow) => Err(surface(flow, &self.ctx)),
        }
    }

    pub fn done(&self) -> bool {
        self.index >= self.body.statements.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.body.statements.len()
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// The result so far: last statement value and top-level captures.
    pub fn into_result(self) -> ExecutionResult {
        ExecutionResult {
            value: self.value,
            variables: self.ctx.top_level_bindings(),
        }
    }
}
