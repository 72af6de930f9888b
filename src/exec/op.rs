//! Query plan node
//!
//! The sole execution input: a tree of operator nodes produced by an
//! external planner. A node is immutable once built and owned by the caller
//! for the lifetime of one execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::Labels;

use super::errors::{ExecError, ExecResult};

/// One operator node in a plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    /// Operator name, dispatched on by the executor.
    pub kind: String,

    /// Output schema: one name per positional row slot.
    #[serde(default)]
    pub labels: Labels,

    /// Operator-specific arguments: expression trees, literals, indices.
    #[serde(default)]
    pub params: Value,

    /// Ordered sub-plans.
    #[serde(default)]
    pub children: Vec<Op>,
}

impl Op {
    /// Builds a leaf node.
    pub fn leaf(kind: impl Into<String>, labels: &[&str], params: Value) -> Self {
        Self {
            kind: kind.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            params,
            children: Vec::new(),
        }
    }

    /// Builds an interior node.
    pub fn node(kind: impl Into<String>, labels: &[&str], params: Value, children: Vec<Op>) -> Self {
        Self {
            kind: kind.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            params,
            children,
        }
    }

    /// Child at `i`, or a malformed-plan error.
    pub fn child(&self, i: usize) -> ExecResult<&Op> {
        self.children
            .get(i)
            .ok_or_else(|| ExecError::plan(format!("{}: missing child {}", self.kind, i)))
    }

    /// Params as an array, or a malformed-plan error.
    pub fn params_array(&self) -> ExecResult<&Vec<Value>> {
        self.params
            .as_array()
            .ok_or_else(|| ExecError::plan(format!("{}: params must be an array", self.kind)))
    }

    /// Named params field, or a malformed-plan error if absent.
    pub fn param(&self, name: &str) -> ExecResult<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| ExecError::plan(format!("{}: missing param {:?}", self.kind, name)))
    }

    /// Named optional params field.
    pub fn param_opt(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}
