//! Declarative integer model: boolean decisions, defined integer auxiliaries, linear
//! constraints, one product per auxiliary at most, and a maximize directive.
//!
//! The model only records what was declared. [crate::optimizer::solver] resolves every
//! auxiliary into an affine form over the booleans before searching, so each integer variable
//! must be defined exactly once, either by [ConstraintModel::add_linear_equality] or by
//! [ConstraintModel::add_multiplication_equality].

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("integer variable '{name}' is defined more than once")]
    Redefined { name: String },
    #[error("integer variable '{name}' has no defining equality")]
    Undefined { name: String },
    #[error("integer variable '{name}' depends on itself")]
    Cyclic { name: String },
    #[error("product variable '{name}' cannot appear in a linear expression or another product")]
    NonLinear { name: String },
    #[error("integer variable '{name}' has an empty domain [{lower}, {upper}]")]
    EmptyDomain {
        name: String,
        lower: i64,
        upper: i64,
    },
    #[error("arithmetic overflow while building '{context}'")]
    Overflow { context: String },
    #[error("model has no objective")]
    MissingObjective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoolVar(pub(crate) usize);

impl BoolVar {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntVar(pub(crate) usize);

impl IntVar {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    Bool(BoolVar),
    Int(IntVar),
}

impl From<BoolVar> for Var {
    fn from(var: BoolVar) -> Self {
        Self::Bool(var)
    }
}

impl From<IntVar> for Var {
    fn from(var: IntVar) -> Self {
        Self::Int(var)
    }
}

/// `Σ coefficient * var + constant`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearExpr {
    terms: Vec<(Var, i64)>,
    constant: i64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(constant: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant,
        }
    }

    /// `Σ coefficient * var` over booleans, skipping zero coefficients.
    pub fn weighted_sum<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (BoolVar, i64)>,
    {
        let mut expr = Self::new();
        for (var, coefficient) in items {
            expr.add_term(var, coefficient);
        }
        expr
    }

    pub fn term(mut self, var: impl Into<Var>, coefficient: i64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn plus(mut self, constant: i64) -> Self {
        self.constant += constant;
        self
    }

    pub fn add_term(&mut self, var: impl Into<Var>, coefficient: i64) {
        if coefficient != 0 {
            self.terms.push((var.into(), coefficient));
        }
    }

    pub fn terms(&self) -> &[(Var, i64)] {
        &self.terms
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    LessEqual,
    GreaterEqual,
    Equal,
    Less,
    Greater,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::Equal => "==",
            Self::Less => "<",
            Self::Greater => ">",
        })
    }
}

/// `expr sense rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Linear(LinearExpr),
    Product(IntVar, IntVar),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntVarDecl {
    pub name: String,
    pub lower: i64,
    pub upper: i64,
    pub definition: Option<Definition>,
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintModel {
    bools: Vec<String>,
    ints: Vec<IntVarDecl>,
    constraints: Vec<LinearConstraint>,
    objective: Option<IntVar>,
}

impl ConstraintModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_bool_var(&mut self, name: impl Into<String>) -> BoolVar {
        self.bools.push(name.into());
        BoolVar(self.bools.len() - 1)
    }

    pub fn new_int_var(
        &mut self,
        lower: i64,
        upper: i64,
        name: impl Into<String>,
    ) -> Result<IntVar, ModelError> {
        let name = name.into();
        if lower > upper {
            return Err(ModelError::EmptyDomain { name, lower, upper });
        }
        self.ints.push(IntVarDecl {
            name,
            lower,
            upper,
            definition: None,
        });
        Ok(IntVar(self.ints.len() - 1))
    }

    pub fn add_linear(
        &mut self,
        name: impl Into<String>,
        expr: LinearExpr,
        sense: Sense,
        rhs: i64,
    ) {
        self.constraints.push(LinearConstraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    /// `target == expr`.
    pub fn add_linear_equality(
        &mut self,
        target: IntVar,
        expr: LinearExpr,
    ) -> Result<(), ModelError> {
        self.define(target, Definition::Linear(expr))
    }

    /// `target == factors[0] * factors[1]`.
    pub fn add_multiplication_equality(
        &mut self,
        target: IntVar,
        factors: [IntVar; 2],
    ) -> Result<(), ModelError> {
        self.define(target, Definition::Product(factors[0], factors[1]))
    }

    pub fn maximize(&mut self, var: IntVar) {
        self.objective = Some(var);
    }

    fn define(&mut self, target: IntVar, definition: Definition) -> Result<(), ModelError> {
        let decl = &mut self.ints[target.0];
        if decl.definition.is_some() {
            return Err(ModelError::Redefined {
                name: decl.name.clone(),
            });
        }
        decl.definition = Some(definition);
        Ok(())
    }

    pub fn num_bools(&self) -> usize {
        self.bools.len()
    }

    pub fn bool_name(&self, var: BoolVar) -> &str {
        &self.bools[var.0]
    }

    pub fn int_decls(&self) -> &[IntVarDecl] {
        &self.ints
    }

    pub fn int_decl(&self, var: IntVar) -> &IntVarDecl {
        &self.ints[var.0]
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<IntVar> {
        self.objective
    }
}
