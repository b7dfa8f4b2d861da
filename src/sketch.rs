//! Restricted evaluator for neuro-symbolic safety programs.
//!
//! A sketch is a small Python-like program defining `is_safe(pixel)` as a
//! single boolean expression over scene queries, for example
//!
//! ```text
//! def is_safe(pixel_loc):
//!     return terrain(pixel_loc) == 0 and distance_to_person(pixel_loc) > 2.5 \
//!         and not in_the_way(pixel_loc)
//! ```
//!
//! The text is compiled once against a [`QueryTable`] and evaluated per
//! pixel. Nothing in the sketch is executed as code: only the operators and
//! functions below exist.

pub(crate) mod lexer;
mod parser;

use std::collections::HashMap;

use crate::errors::{Result, SafetyError};
use crate::scene::Domain;
use crate::traits::{Pixel, SceneQueries};

/// A scene query a sketch may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Terrain,
    InTheWay,
    Slope,
    DistanceTo(String),
    FrontalDistance(String),
}

impl Query {
    fn call(&self, scene: &dyn SceneQueries, pixel: Pixel) -> Result<Value> {
        match self {
            Self::Terrain => scene.terrain(pixel).map(Value::Num),
            Self::InTheWay => scene.in_the_way(pixel).map(Value::Bool),
            Self::Slope => scene.slope(pixel).map(Value::Num),
            Self::DistanceTo(object) => scene.distance_to(object, pixel).map(Value::Num),
            Self::FrontalDistance(object) => scene.frontal_distance(object, pixel).map(Value::Num),
        }
    }
}

/// Function names visible to a sketch, each bound to a [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryTable {
    functions: HashMap<String, Query>,
}

impl QueryTable {
    /// `terrain`, `in_the_way`, `slope`, plus `distance_to_<obj>` and
    /// `frontal_distance_<obj>` for every domain object.
    pub fn for_domain(domain: &Domain) -> Self {
        let mut functions = HashMap::from([
            ("terrain".to_string(), Query::Terrain),
            ("in_the_way".to_string(), Query::InTheWay),
            ("slope".to_string(), Query::Slope),
        ]);
        for object in &domain.objects {
            functions.insert(
                format!("distance_to_{object}"),
                Query::DistanceTo(object.clone()),
            );
            functions.insert(
                format!("frontal_distance_{object}"),
                Query::FrontalDistance(object.clone()),
            );
        }
        Self { functions }
    }

    pub fn get(&self, name: &str) -> Option<&Query> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Num(f64),
    Bool(bool),
}

impl Value {
    fn truthy(self) -> bool {
        match self {
            Self::Num(n) => n != 0.0,
            Self::Bool(b) => b,
        }
    }

    fn as_num(self) -> f64 {
        match self {
            Self::Num(n) => n,
            Self::Bool(b) => f64::from(u8::from(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Bool(bool),
    Call(Query),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// Python-style chain: `a < b <= c` means `a < b and b <= c`.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
}

impl Expr {
    fn eval(&self, scene: &dyn SceneQueries, pixel: Pixel) -> Result<Value> {
        match self {
            Self::Num(n) => Ok(Value::Num(*n)),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Call(query) => query.call(scene, pixel),
            Self::Not(inner) => Ok(Value::Bool(!inner.eval(scene, pixel)?.truthy())),
            Self::And(operands) => {
                for operand in operands {
                    if !operand.eval(scene, pixel)?.truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or(operands) => {
                for operand in operands {
                    if operand.eval(scene, pixel)?.truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Compare { first, rest } => {
                let mut lhs = first.eval(scene, pixel)?.as_num();
                for (op, expr) in rest {
                    let rhs = expr.eval(scene, pixel)?.as_num();
                    if !op.apply(lhs, rhs) {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Self::Arith { op, lhs, rhs } => {
                let lhs = lhs.eval(scene, pixel)?.as_num();
                let rhs = rhs.eval(scene, pixel)?.as_num();
                let value = match op {
                    ArithOp::Add => lhs + rhs,
                    ArithOp::Sub => lhs - rhs,
                    ArithOp::Mul => lhs * rhs,
                    ArithOp::Div if rhs == 0.0 => {
                        return Err(SafetyError::Query {
                            query: "division".to_string(),
                            x: pixel.0,
                            y: pixel.1,
                            reason: "division by zero".to_string(),
                        })
                    }
                    ArithOp::Div => lhs / rhs,
                };
                Ok(Value::Num(value))
            }
            Self::Neg(inner) => Ok(Value::Num(-inner.eval(scene, pixel)?.as_num())),
        }
    }
}

/// A compiled `is_safe` predicate.
#[derive(Debug, Clone)]
pub struct Sketch {
    body: Expr,
}

impl Sketch {
    pub fn compile(text: &str, table: &QueryTable) -> Result<Self> {
        let tokens = lexer::tokenize(text)?;
        if tokens.is_empty() {
            return Err(SafetyError::sketch("sketch is empty"));
        }
        let body = parser::Parser::new(tokens, table).parse_program()?;
        Ok(Self { body })
    }

    /// Evaluates the predicate at `pixel`. Query failures are returned to the
    /// caller, which decides what a failed pixel means.
    pub fn is_safe(&self, scene: &dyn SceneQueries, pixel: Pixel) -> Result<bool> {
        Ok(self.body.eval(scene, pixel)?.truthy())
    }
}
