//! Exact depth-first branch-and-bound over a [ConstraintModel].
//!
//! Presolve rewrites every defined integer variable as an affine form over the booleans (or a
//! product of two such forms) and every constraint as `Σ a_i x_i <= r` rows. The search then
//! fixes booleans one at a time, ones first, keeping for every row the smallest activity the
//! free variables still allow. A branch dies as soon as a row cannot be satisfied anymore.
//!
//! Every node also evaluates its *zero completion* (all free variables set to false) as a
//! candidate, which yields incumbents early. Nodes are pruned when an upper bound of the
//! objective cannot beat the incumbent. Each factor is bounded by the best picks that still fit
//! on their own, at most the open slots of every unit row (`Σ_group x_i <= k`, and the
//! cardinality row spanning all booleans), further cut by a Lagrangian relaxation of every
//! positive-weight row such as a budget. A product objective is also bounded through AM-GM on a
//! weighted sum of its two factors, balanced at the current incumbent.
//!
//! Row activities must fit in `i64`: presolve rejects any row whose absolute coefficients sum
//! past it. Pruning only discards strictly non-improving subtrees, so the first optimum found
//! in the fixed branching order is returned and repeated solves are deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::optimizer::model::{
    BoolVar, ConstraintModel, Definition, IntVar, LinearExpr, ModelError, Sense, Var,
};
use crate::optimizer::monitor::{
    CompositeMonitor, InterruptMonitor, LogMonitor, SearchCommand, SearchMonitor,
    SolutionLimitMonitor, TimeLimitMonitor,
};

/// Resource limits for one solve. The default imposes none.
#[derive(Debug, Clone, Default)]
pub struct SolverLimits {
    pub time_limit: Option<Duration>,
    pub interrupt: Option<Arc<AtomicBool>>,
    /// Stop after this many improving solutions.
    pub solution_limit: Option<u64>,
}

impl SolverLimits {
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn with_solution_limit(mut self, solution_limit: u64) -> Self {
        self.solution_limit = Some(solution_limit);
        self
    }

    fn monitor(&self) -> CompositeMonitor {
        let mut monitor = CompositeMonitor::new();
        monitor.add(Box::new(LogMonitor::default()));
        if let Some(limit) = self.time_limit {
            monitor.add(Box::new(TimeLimitMonitor::new(limit)));
        }
        if let Some(flag) = &self.interrupt {
            monitor.add(Box::new(InterruptMonitor::new(Arc::clone(flag))));
        }
        if let Some(limit) = self.solution_limit {
            monitor.add(Box::new(SolutionLimitMonitor::new(limit)));
        }
        monitor
    }
}

/// A complete assignment with the values of every integer variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    values: Vec<bool>,
    int_values: Vec<i64>,
    objective: i64,
}

impl Solution {
    pub fn value(&self, var: BoolVar) -> bool {
        self.values[var.index()]
    }

    pub fn int_value(&self, var: IntVar) -> i64 {
        self.int_values[var.index()]
    }

    pub fn objective_value(&self) -> i64 {
        self.objective
    }

    /// Booleans set to true, in index order.
    pub fn selected(&self) -> impl Iterator<Item = BoolVar> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| **value)
            .map(|(index, _)| BoolVar(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverResult {
    /// No assignment satisfies the constraints.
    Infeasible,
    /// Best possible objective, proven.
    Optimal(Solution),
    /// A solution was found but the search stopped before proving it optimal.
    Feasible(Solution),
    /// The search stopped before finding any solution or proving there is none.
    Unknown,
}

impl fmt::Display for SolverResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infeasible => write!(f, "Infeasible"),
            Self::Optimal(solution) => {
                write!(f, "Optimal(objective={})", solution.objective_value())
            }
            Self::Feasible(solution) => {
                write!(f, "Feasible(objective={})", solution.objective_value())
            }
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    OptimalityProven,
    InfeasibilityProven,
    /// A monitor stopped the search; carries its reason.
    Aborted(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptimalityProven => write!(f, "Optimality Proven"),
            Self::InfeasibilityProven => write!(f, "Infeasibility Proven"),
            Self::Aborted(reason) => write!(f, "Aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverStatistics {
    pub nodes: u64,
    pub pruned_by_bound: u64,
    pub infeasible_branches: u64,
    pub solutions_found: u64,
    pub solve_duration: Duration,
}

impl fmt::Display for SolverStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Solver Statistics:")?;
        writeln!(f, "  Nodes: {}", self.nodes)?;
        writeln!(f, "  Pruned By Bound: {}", self.pruned_by_bound)?;
        writeln!(f, "  Infeasible Branches: {}", self.infeasible_branches)?;
        writeln!(f, "  Solutions Found: {}", self.solutions_found)?;
        writeln!(
            f,
            "  Solve Duration (secs): {:.3}",
            self.solve_duration.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveOutcome {
    pub result: SolverResult,
    pub reason: TerminationReason,
    pub statistics: SolverStatistics,
}

impl SolveOutcome {
    pub fn is_optimal(&self) -> bool {
        matches!(self.result, SolverResult::Optimal(_))
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self.result, SolverResult::Infeasible)
    }

    pub fn solution(&self) -> Option<&Solution> {
        match &self.result {
            SolverResult::Optimal(solution) | SolverResult::Feasible(solution) => Some(solution),
            SolverResult::Infeasible | SolverResult::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Solver {
    limits: SolverLimits,
}

impl Solver {
    pub fn new(limits: SolverLimits) -> Self {
        Self { limits }
    }

    pub fn solve(&self, model: &ConstraintModel) -> Result<SolveOutcome, ModelError> {
        let start = Instant::now();
        let problem = Problem::presolve(model)?;
        let mut search = Search::new(&problem, self.limits.monitor());
        let (result, reason) = search.run();
        let mut statistics = search.statistics;
        statistics.solve_duration = start.elapsed();
        tracing::info!(
            %result,
            %reason,
            nodes = statistics.nodes,
            pruned = statistics.pruned_by_bound,
            elapsed_ms = statistics.solve_duration.as_millis() as u64,
            "solve finished"
        );
        Ok(SolveOutcome {
            result,
            reason,
            statistics,
        })
    }
}

pub fn solve(model: &ConstraintModel, limits: SolverLimits) -> Result<SolveOutcome, ModelError> {
    Solver::new(limits).solve(model)
}

/// `constant + Σ coefficient * x_index`, sparse and sorted by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Affine {
    terms: Vec<(usize, i64)>,
    constant: i64,
}

impl Affine {
    fn eval(&self, values: &[bool]) -> i128 {
        self.constant as i128
            + self
                .terms
                .iter()
                .filter(|(var, _)| values[*var])
                .map(|(_, coefficient)| *coefficient as i128)
                .sum::<i128>()
    }
}

/// Accumulates `Σ coefficient * x` with checked arithmetic.
#[derive(Debug, Default)]
struct AffineBuilder {
    terms: BTreeMap<usize, i64>,
    constant: i64,
    context: String,
}

impl AffineBuilder {
    fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            ..Self::default()
        }
    }

    fn overflow(&self) -> ModelError {
        ModelError::Overflow {
            context: self.context.clone(),
        }
    }

    fn add_constant(&mut self, value: i64) -> Result<(), ModelError> {
        self.constant = self.constant.checked_add(value).ok_or_else(|| self.overflow())?;
        Ok(())
    }

    fn add_term(&mut self, var: usize, coefficient: i64) -> Result<(), ModelError> {
        let slot = self.terms.entry(var).or_insert(0);
        match slot.checked_add(coefficient) {
            Some(sum) => {
                *slot = sum;
                Ok(())
            }
            None => Err(ModelError::Overflow {
                context: self.context.clone(),
            }),
        }
    }

    fn add_scaled(&mut self, affine: &Affine, factor: i64) -> Result<(), ModelError> {
        let constant = affine
            .constant
            .checked_mul(factor)
            .ok_or_else(|| self.overflow())?;
        self.add_constant(constant)?;
        for &(var, coefficient) in &affine.terms {
            let scaled = coefficient
                .checked_mul(factor)
                .ok_or_else(|| self.overflow())?;
            self.add_term(var, scaled)?;
        }
        Ok(())
    }

    fn build(self) -> Affine {
        Affine {
            terms: self
                .terms
                .into_iter()
                .filter(|(_, coefficient)| *coefficient != 0)
                .collect(),
            constant: self.constant,
        }
    }
}

#[derive(Debug, Clone)]
enum IntForm {
    Affine(Affine),
    Product(usize, usize),
}

/// `Σ a_i x_i <= rhs`.
#[derive(Debug, Clone)]
struct Row {
    name: String,
    terms: Vec<(usize, i64)>,
    rhs: i64,
}

/// A row whose weights are all positive (and not all one), read as a knapsack when bounding.
#[derive(Debug, Clone)]
struct Knapsack {
    row: usize,
    weights: Vec<i64>,
}

/// One linear quantity over the booleans with its coefficients pre-sorted for bounding.
#[derive(Debug, Clone)]
struct Factor {
    constant: i64,
    dense: Vec<i64>,
    descending: Vec<(usize, i64)>,
    ascending_negative: Vec<(usize, i64)>,
    /// Positive terms as `(var, coefficient, weight)` per knapsack, best ratio first.
    by_ratio: Vec<Vec<(usize, i64, i64)>>,
    /// Declared range of the quantity.
    domain: (i128, i128),
}

impl Factor {
    fn new(
        terms: &[(usize, i64)],
        constant: i64,
        domain: (i128, i128),
        num_bools: usize,
        knapsacks: &[Knapsack],
    ) -> Self {
        let mut dense = vec![0; num_bools];
        for &(var, coefficient) in terms {
            dense[var] = coefficient;
        }
        let mut descending: Vec<(usize, i64)> =
            terms.iter().copied().filter(|(_, c)| *c > 0).collect();
        descending.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut ascending_negative: Vec<(usize, i64)> =
            terms.iter().copied().filter(|(_, c)| *c < 0).collect();
        ascending_negative.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        let by_ratio = knapsacks
            .iter()
            .map(|knapsack| {
                let mut items: Vec<(usize, i64, i64)> = descending
                    .iter()
                    .map(|&(var, c)| (var, c, knapsack.weights[var]))
                    .collect();
                // c_a / w_a > c_b / w_b, cross-multiplied so zero weights sort first.
                items.sort_by(|a, b| {
                    let left = a.1 as i128 * b.2 as i128;
                    let right = b.1 as i128 * a.2 as i128;
                    right.cmp(&left).then(a.0.cmp(&b.0))
                });
                items
            })
            .collect();
        Self {
            constant,
            dense,
            descending,
            ascending_negative,
            by_ratio,
            domain,
        }
    }

    fn from_affine(
        affine: &Affine,
        domain: (i64, i64),
        num_bools: usize,
        knapsacks: &[Knapsack],
    ) -> Self {
        let domain = (domain.0 as i128, domain.1 as i128);
        Self::new(&affine.terms, affine.constant, domain, num_bools, knapsacks)
    }

    /// `p * self + q * other`, or `None` when a coefficient leaves `i64`.
    fn blend(&self, p: i64, other: &Factor, q: i64, knapsacks: &[Knapsack]) -> Option<Self> {
        let mix =
            |a: i64, b: i64| i64::try_from(a as i128 * p as i128 + b as i128 * q as i128).ok();
        let constant = mix(self.constant, other.constant)?;
        let mut terms = Vec::new();
        for (var, (a, b)) in self.dense.iter().zip(&other.dense).enumerate() {
            let coefficient = mix(*a, *b)?;
            if coefficient != 0 {
                terms.push((var, coefficient));
            }
        }
        let domain = (i128::MIN, i128::MAX);
        Some(Self::new(&terms, constant, domain, self.dense.len(), knapsacks))
    }

    /// Value with every positive term set.
    fn reach(&self) -> i128 {
        self.constant as i128 + self.descending.iter().map(|(_, c)| *c as i128).sum::<i128>()
    }
}

#[derive(Debug, Clone)]
enum ObjectiveForm {
    Linear(Factor),
    Product(Factor, Factor),
}

impl ObjectiveForm {
    fn factors(&self) -> Vec<&Factor> {
        match self {
            Self::Linear(factor) => vec![factor],
            Self::Product(left, right) => vec![left, right],
        }
    }
}

/// Largest weight used when blending the two factors of a product.
const BLEND_WEIGHT_LIMIT: i128 = 1 << 20;

/// `p * left + q * right` for a product objective. By AM-GM,
/// `left * right <= (p * left + q * right)^2 / (4pq)` for any `p, q > 0`, which is tight where
/// `p * left == q * right`.
#[derive(Debug, Clone)]
struct Blend {
    p: i64,
    q: i64,
    factor: Factor,
}

impl Blend {
    /// Weights balanced at the point `(left, right)`.
    fn around(problem: &Problem, left: i128, right: i128) -> Option<Self> {
        let ObjectiveForm::Product(left_factor, right_factor) = &problem.objective else {
            return None;
        };
        if left <= 0 || right <= 0 {
            return None;
        }
        let (mut p, mut q) = (right, left);
        while p > BLEND_WEIGHT_LIMIT || q > BLEND_WEIGHT_LIMIT {
            p = (p >> 1).max(1);
            q = (q >> 1).max(1);
        }
        let (p, q) = (i64::try_from(p).ok()?, i64::try_from(q).ok()?);
        let factor = left_factor.blend(p, right_factor, q, &problem.knapsacks)?;
        Some(Self { p, q, factor })
    }
}

#[derive(Debug, Clone)]
struct Problem {
    num_bools: usize,
    rows: Vec<Row>,
    columns: Vec<Vec<(usize, i64)>>,
    /// Rows of the form `Σ_all x_i <= k`.
    cardinality_rows: Vec<usize>,
    /// First row of the form `Σ_some x_i <= k` holding each boolean.
    group_of: Vec<Option<usize>>,
    knapsacks: Vec<Knapsack>,
    int_forms: Vec<IntForm>,
    int_domains: Vec<(i64, i64)>,
    product_vars: Vec<usize>,
    objective: ObjectiveForm,
    objective_var: usize,
    /// Name of a constraint that no assignment can satisfy, found during presolve.
    root_conflict: Option<String>,
}

impl Problem {
    fn presolve(model: &ConstraintModel) -> Result<Self, ModelError> {
        let num_bools = model.num_bools();
        let forms = resolve_int_forms(model)?;
        let objective_var = model.objective().ok_or(ModelError::MissingObjective)?;

        let mut rows = Vec::new();
        for constraint in model.constraints() {
            let affine = linearize(model, &forms, &constraint.expr, &constraint.name)?;
            push_rows(&mut rows, &constraint.name, &affine, constraint.sense, constraint.rhs)?;
        }
        let int_forms: Vec<IntForm> = forms.into_iter().flatten().collect();

        let mut product_vars = Vec::new();
        let mut int_domains = Vec::with_capacity(int_forms.len());
        for (index, (form, decl)) in int_forms.iter().zip(model.int_decls()).enumerate() {
            int_domains.push((decl.lower, decl.upper));
            match form {
                IntForm::Affine(affine) => {
                    let name = format!("{} domain", decl.name);
                    push_rows(&mut rows, &name, affine, Sense::LessEqual, decl.upper)?;
                    push_rows(&mut rows, &name, affine, Sense::GreaterEqual, decl.lower)?;
                }
                IntForm::Product(..) => product_vars.push(index),
            }
        }

        // Row activities are tracked in `i64` during the search.
        for row in &rows {
            let magnitude: i128 = row.terms.iter().map(|(_, c)| (*c as i128).abs()).sum();
            if magnitude > i64::MAX as i128 {
                return Err(ModelError::Overflow {
                    context: row.name.clone(),
                });
            }
        }

        let mut root_conflict = None;
        rows.retain(|row| {
            if !row.terms.is_empty() {
                return true;
            }
            if row.rhs < 0 && root_conflict.is_none() {
                root_conflict = Some(row.name.clone());
            }
            false
        });
        // Rows that hold for every assignment carry no information.
        rows.retain(|row| {
            let max_activity: i128 = row
                .terms
                .iter()
                .filter(|(_, c)| *c > 0)
                .map(|(_, c)| *c as i128)
                .sum();
            max_activity > row.rhs as i128
        });

        let mut columns = vec![Vec::new(); num_bools];
        for (row_index, row) in rows.iter().enumerate() {
            for &(var, coefficient) in &row.terms {
                columns[var].push((row_index, coefficient));
            }
        }
        let unit = |row: &Row| row.terms.iter().all(|(_, c)| *c == 1);
        let mut cardinality_rows = Vec::new();
        let mut group_of = vec![None; num_bools];
        let mut knapsacks = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            if unit(row) && row.terms.len() == num_bools {
                cardinality_rows.push(index);
            } else if unit(row) {
                for &(var, _) in &row.terms {
                    if group_of[var].is_none() {
                        group_of[var] = Some(index);
                    }
                }
            } else if row.terms.iter().all(|(_, c)| *c > 0) {
                let mut weights = vec![0; num_bools];
                for &(var, coefficient) in &row.terms {
                    weights[var] = coefficient;
                }
                knapsacks.push(Knapsack {
                    row: index,
                    weights,
                });
            }
        }

        let objective = match &int_forms[objective_var.index()] {
            IntForm::Affine(affine) => ObjectiveForm::Linear(Factor::from_affine(
                affine,
                int_domains[objective_var.index()],
                num_bools,
                &knapsacks,
            )),
            IntForm::Product(left_index, right_index) => {
                let (IntForm::Affine(left), IntForm::Affine(right)) =
                    (&int_forms[*left_index], &int_forms[*right_index])
                else {
                    return Err(ModelError::NonLinear {
                        name: model.int_decl(objective_var).name.clone(),
                    });
                };
                ObjectiveForm::Product(
                    Factor::from_affine(left, int_domains[*left_index], num_bools, &knapsacks),
                    Factor::from_affine(right, int_domains[*right_index], num_bools, &knapsacks),
                )
            }
        };

        tracing::debug!(
            bools = num_bools,
            rows = rows.len(),
            groups = group_of.iter().flatten().collect::<BTreeSet<_>>().len(),
            knapsacks = knapsacks.len(),
            products = product_vars.len(),
            "presolved model"
        );

        Ok(Self {
            num_bools,
            rows,
            columns,
            cardinality_rows,
            group_of,
            knapsacks,
            int_forms,
            int_domains,
            product_vars,
            objective,
            objective_var: objective_var.index(),
            root_conflict,
        })
    }

    fn eval_int(&self, index: usize, values: &[bool]) -> i128 {
        match &self.int_forms[index] {
            IntForm::Affine(affine) => affine.eval(values),
            IntForm::Product(left, right) => {
                self.eval_int(*left, values).saturating_mul(self.eval_int(*right, values))
            }
        }
    }

    fn products_in_domain(&self, values: &[bool]) -> bool {
        self.product_vars.iter().all(|&index| {
            let (lower, upper) = self.int_domains[index];
            let value = self.eval_int(index, values);
            lower as i128 <= value && value <= upper as i128
        })
    }

    /// Branching order: largest estimated objective gain first, ties by index.
    fn branching_order(&self) -> Vec<usize> {
        let scores: Vec<i128> = match &self.objective {
            ObjectiveForm::Linear(factor) => factor.dense.iter().map(|c| *c as i128).collect(),
            ObjectiveForm::Product(left, right) => {
                let (left_hi, right_hi) = (left.reach(), right.reach());
                (0..self.num_bools)
                    .map(|var| {
                        left.dense[var] as i128 * right_hi.abs().max(1)
                            + right.dense[var] as i128 * left_hi.abs().max(1)
                    })
                    .collect()
            }
        };
        let mut order: Vec<usize> = (0..self.num_bools).collect();
        order.sort_by(|a, b| scores[*b].cmp(&scores[*a]).then(a.cmp(b)));
        order
    }
}

/// Resolves every integer variable; the returned forms are all `Some`.
fn resolve_int_forms(model: &ConstraintModel) -> Result<Vec<Option<IntForm>>, ModelError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        model: &ConstraintModel,
        index: usize,
        marks: &mut [Mark],
        forms: &mut [Option<IntForm>],
    ) -> Result<(), ModelError> {
        let decl = &model.int_decls()[index];
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(ModelError::Cyclic {
                    name: decl.name.clone(),
                })
            }
            Mark::Unvisited => marks[index] = Mark::Visiting,
        }
        let form = match &decl.definition {
            None => {
                return Err(ModelError::Undefined {
                    name: decl.name.clone(),
                })
            }
            Some(Definition::Linear(expr)) => {
                for (var, _) in expr.terms() {
                    if let Var::Int(dependency) = var {
                        visit(model, dependency.index(), marks, forms)?;
                    }
                }
                IntForm::Affine(linearize(model, forms, expr, &decl.name)?)
            }
            Some(Definition::Product(left, right)) => {
                for factor in [left, right] {
                    visit(model, factor.index(), marks, forms)?;
                    if matches!(forms[factor.index()], Some(IntForm::Product(..))) {
                        return Err(ModelError::NonLinear {
                            name: model.int_decl(*factor).name.clone(),
                        });
                    }
                }
                IntForm::Product(left.index(), right.index())
            }
        };
        forms[index] = Some(form);
        marks[index] = Mark::Done;
        Ok(())
    }

    let count = model.int_decls().len();
    let mut marks = vec![Mark::Unvisited; count];
    let mut forms: Vec<Option<IntForm>> = vec![None; count];
    for index in 0..count {
        visit(model, index, &mut marks, &mut forms)?;
    }
    Ok(forms)
}

fn linearize(
    model: &ConstraintModel,
    forms: &[Option<IntForm>],
    expr: &LinearExpr,
    context: &str,
) -> Result<Affine, ModelError> {
    let mut builder = AffineBuilder::new(context);
    builder.add_constant(expr.constant_term())?;
    for &(var, coefficient) in expr.terms() {
        match var {
            Var::Bool(var) => builder.add_term(var.index(), coefficient)?,
            Var::Int(var) => match &forms[var.index()] {
                Some(IntForm::Affine(affine)) => builder.add_scaled(affine, coefficient)?,
                Some(IntForm::Product(..)) => {
                    return Err(ModelError::NonLinear {
                        name: model.int_decl(var).name.clone(),
                    })
                }
                None => {
                    return Err(ModelError::Undefined {
                        name: model.int_decl(var).name.clone(),
                    })
                }
            },
        }
    }
    Ok(builder.build())
}

/// Appends `affine sense rhs` as one or two `<=` rows.
fn push_rows(
    rows: &mut Vec<Row>,
    name: &str,
    affine: &Affine,
    sense: Sense,
    rhs: i64,
) -> Result<(), ModelError> {
    let overflow = || ModelError::Overflow {
        context: name.to_string(),
    };
    let bound = rhs.checked_sub(affine.constant).ok_or_else(overflow)?;
    let negated: Vec<(usize, i64)> = affine.terms.iter().map(|(v, c)| (*v, -c)).collect();
    let mut push = |terms: Vec<(usize, i64)>, rhs: i64| {
        rows.push(Row {
            name: name.to_string(),
            terms,
            rhs,
        })
    };
    match sense {
        Sense::LessEqual => push(affine.terms.clone(), bound),
        Sense::Less => push(affine.terms.clone(), bound.checked_sub(1).ok_or_else(overflow)?),
        Sense::GreaterEqual => push(negated, bound.checked_neg().ok_or_else(overflow)?),
        Sense::Greater => push(
            negated,
            bound
                .checked_neg()
                .and_then(|b| b.checked_sub(1))
                .ok_or_else(overflow)?,
        ),
        Sense::Equal => {
            push(affine.terms.clone(), bound);
            push(negated, bound.checked_neg().ok_or_else(overflow)?);
        }
    }
    Ok(())
}

struct Search<'a> {
    problem: &'a Problem,
    factors: Vec<&'a Factor>,
    /// Refreshed around every new incumbent of a product objective.
    blend: Option<Blend>,
    order: Vec<usize>,
    assigned: Vec<Option<bool>>,
    row_fixed: Vec<i64>,
    row_negative_free: Vec<i64>,
    factor_fixed: Vec<i128>,
    incumbent: Option<Solution>,
    best: Option<i128>,
    monitor: CompositeMonitor,
    aborted: Option<String>,
    statistics: SolverStatistics,
}

impl<'a> Search<'a> {
    fn new(problem: &'a Problem, monitor: CompositeMonitor) -> Self {
        let row_negative_free = problem
            .rows
            .iter()
            .map(|row| row.terms.iter().map(|(_, c)| (*c).min(0)).sum::<i64>())
            .collect();
        let factors = problem.objective.factors();
        let factor_fixed = factors.iter().map(|factor| factor.constant as i128).collect();
        let blend = match &problem.objective {
            ObjectiveForm::Product(left, right) => {
                Blend::around(problem, left.reach(), right.reach())
            }
            ObjectiveForm::Linear(_) => None,
        };
        Self {
            problem,
            factors,
            blend,
            order: problem.branching_order(),
            assigned: vec![None; problem.num_bools],
            row_fixed: vec![0; problem.rows.len()],
            row_negative_free,
            factor_fixed,
            incumbent: None,
            best: None,
            monitor,
            aborted: None,
            statistics: SolverStatistics::default(),
        }
    }

    fn run(&mut self) -> (SolverResult, TerminationReason) {
        if let Some(name) = &self.problem.root_conflict {
            tracing::debug!(constraint = %name, "constraint unsatisfiable at root");
            return (SolverResult::Infeasible, TerminationReason::InfeasibilityProven);
        }
        if let Some(row) = (0..self.problem.rows.len()).find(|&row| !self.row_satisfiable(row)) {
            tracing::debug!(constraint = %self.problem.rows[row].name, "constraint unsatisfiable at root");
            return (SolverResult::Infeasible, TerminationReason::InfeasibilityProven);
        }

        self.monitor.on_enter_search();
        self.search(0, true);

        match (self.aborted.take(), self.incumbent.take()) {
            (Some(reason), Some(solution)) => (
                SolverResult::Feasible(solution),
                TerminationReason::Aborted(reason),
            ),
            (Some(reason), None) => (SolverResult::Unknown, TerminationReason::Aborted(reason)),
            (None, Some(solution)) => (
                SolverResult::Optimal(solution),
                TerminationReason::OptimalityProven,
            ),
            (None, None) => (
                SolverResult::Infeasible,
                TerminationReason::InfeasibilityProven,
            ),
        }
    }

    /// Returns false once the search must stop.
    fn search(&mut self, depth: usize, fresh: bool) -> bool {
        if let SearchCommand::Terminate(reason) = self.monitor.search_command() {
            self.aborted = Some(reason);
            return false;
        }
        self.monitor.on_step();
        self.statistics.nodes += 1;

        if fresh {
            self.try_zero_completion();
        }
        if depth == self.order.len() {
            return true;
        }
        if let Some(best) = self.best {
            if self.objective_bound() <= best {
                self.statistics.pruned_by_bound += 1;
                return true;
            }
        }

        let var = self.order[depth];
        for value in [true, false] {
            let feasible = self.assign(var, value);
            let keep_going = if feasible {
                self.search(depth + 1, value)
            } else {
                self.statistics.infeasible_branches += 1;
                true
            };
            self.unassign(var, value);
            if !keep_going {
                return false;
            }
        }
        true
    }

    fn row_satisfiable(&self, row: usize) -> bool {
        self.row_fixed[row] + self.row_negative_free[row] <= self.problem.rows[row].rhs
    }

    /// Fixes `var` and reports whether every row it touches can still be satisfied. The caller
    /// undoes the assignment with [Search::unassign] either way.
    fn assign(&mut self, var: usize, value: bool) -> bool {
        for &(row, coefficient) in &self.problem.columns[var] {
            if coefficient < 0 {
                self.row_negative_free[row] -= coefficient;
            }
            if value {
                self.row_fixed[row] += coefficient;
            }
        }
        if value {
            for (fixed, factor) in self.factor_fixed.iter_mut().zip(&self.factors) {
                *fixed += factor.dense[var] as i128;
            }
        }
        self.assigned[var] = Some(value);
        self.problem.columns[var]
            .iter()
            .all(|&(row, _)| self.row_satisfiable(row))
    }

    fn unassign(&mut self, var: usize, value: bool) {
        for &(row, coefficient) in &self.problem.columns[var] {
            if coefficient < 0 {
                self.row_negative_free[row] += coefficient;
            }
            if value {
                self.row_fixed[row] -= coefficient;
            }
        }
        if value {
            for (fixed, factor) in self.factor_fixed.iter_mut().zip(&self.factors) {
                *fixed -= factor.dense[var] as i128;
            }
        }
        self.assigned[var] = None;
    }

    /// How many more booleans may still become true.
    fn remaining_cardinality(&self) -> usize {
        self.problem
            .cardinality_rows
            .iter()
            .map(|&row| (self.problem.rows[row].rhs - self.row_fixed[row]).max(0) as usize)
            .min()
            .unwrap_or(usize::MAX)
    }

    /// Free booleans that can still become true without breaking a row on their own.
    fn open_vars(&self) -> Vec<bool> {
        (0..self.problem.num_bools)
            .map(|var| {
                self.assigned[var].is_none()
                    && self.problem.columns[var].iter().all(|&(row, c)| {
                        c <= 0
                            || self.row_fixed[row] as i128
                                + self.row_negative_free[row] as i128
                                + c as i128
                                <= self.problem.rows[row].rhs as i128
                    })
            })
            .collect()
    }

    /// Sum of the first `limit` values, best first, taking no more from a group than its row
    /// still admits.
    fn capped_sum(&self, values: impl Iterator<Item = (usize, i128)>, limit: usize) -> i128 {
        let mut total: i128 = 0;
        let mut taken = 0;
        let mut groups: Vec<(usize, i64)> = Vec::new();
        for (var, value) in values {
            if taken == limit {
                break;
            }
            if let Some(row) = self.problem.group_of[var] {
                let room = self.problem.rows[row].rhs - self.row_fixed[row];
                let slot = match groups.iter().position(|(group, _)| *group == row) {
                    Some(slot) => slot,
                    None => {
                        groups.push((row, 0));
                        groups.len() - 1
                    }
                };
                if groups[slot].1 >= room {
                    continue;
                }
                groups[slot].1 += 1;
            }
            total = total.saturating_add(value);
            taken += 1;
        }
        total
    }

    /// Largest value `factor` can still reach.
    fn upper(&self, factor: &Factor, fixed: i128, open: &[bool], limit: usize) -> i128 {
        let greedy = self.capped_sum(
            factor
                .descending
                .iter()
                .filter(|(var, _)| open[*var])
                .map(|&(var, c)| (var, c as i128)),
            limit,
        );
        let gain = self
            .problem
            .knapsacks
            .iter()
            .zip(&factor.by_ratio)
            .filter_map(|(knapsack, items)| self.knapsack_bound(knapsack, items, open, limit))
            .fold(greedy, i128::min);
        fixed.saturating_add(gain).min(factor.domain.1)
    }

    /// Smallest value `factor` can still reach.
    fn lower(&self, factor: &Factor, fixed: i128, open: &[bool], limit: usize) -> i128 {
        let drop: i128 = factor
            .ascending_negative
            .iter()
            .filter(|(var, _)| open[*var])
            .take(limit)
            .map(|(_, c)| *c as i128)
            .sum();
        fixed.saturating_add(drop).max(factor.domain.0)
    }

    /// Lagrangian relaxation of one knapsack row. Every `λ >= 0` gives
    /// `Σ c x <= λ * slack + Σ max(0, c - λ w) x`; the multipliers tried are the ratios from the
    /// item that overflows the slack downwards, where the bound is unimodal.
    fn knapsack_bound(
        &self,
        knapsack: &Knapsack,
        items: &[(usize, i64, i64)],
        open: &[bool],
        limit: usize,
    ) -> Option<i128> {
        let row = &self.problem.rows[knapsack.row];
        let slack = (row.rhs as i128 - self.row_fixed[knapsack.row] as i128).max(0);
        let mut used: i128 = 0;
        let critical = items.iter().position(|&(var, _, weight)| {
            if !open[var] {
                return false;
            }
            used += weight as i128;
            used > slack
        })?;
        let candidates: Vec<usize> = (critical..items.len())
            .filter(|&position| open[items[position].0] && items[position].2 > 0)
            .collect();
        let evaluate = |position: usize| {
            let (_, c, w) = items[position];
            self.lagrangian(items, c as i128, w as i128, slack, open, limit)
        };
        let (mut lo, mut hi) = (0, candidates.len().checked_sub(1)?);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if evaluate(candidates[mid]) <= evaluate(candidates[mid + 1]) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Some(evaluate(candidates[lo]))
    }

    /// The bound at `λ = p / q`, rounded up.
    fn lagrangian(
        &self,
        items: &[(usize, i64, i64)],
        p: i128,
        q: i128,
        slack: i128,
        open: &[bool],
        limit: usize,
    ) -> i128 {
        let mut gains: Vec<(usize, i128)> = items
            .iter()
            .take_while(|&&(_, c, w)| c as i128 * q > p * w as i128)
            .filter(|(var, _, _)| open[*var])
            .map(|&(var, c, w)| (var, c as i128 * q - p * w as i128))
            .collect();
        gains.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let numerator = p
            .saturating_mul(slack)
            .saturating_add(self.capped_sum(gains.into_iter(), limit));
        numerator / q + i128::from(numerator % q != 0)
    }

    /// AM-GM bound of a product objective, if the blended values stay in range.
    fn blend_bound(&self, open: &[bool], limit: usize) -> Option<i128> {
        let blend = self.blend.as_ref()?;
        let (p, q) = (blend.p as i128, blend.q as i128);
        let fixed = p
            .checked_mul(self.factor_fixed[0])?
            .checked_add(q.checked_mul(self.factor_fixed[1])?)?;
        let hi = self.upper(&blend.factor, fixed, open, limit);
        let lo = self.lower(&blend.factor, fixed, open, limit);
        let square = hi.checked_mul(hi)?.max(lo.checked_mul(lo)?);
        let denominator = p.checked_mul(q)?.checked_mul(4)?;
        Some(square / denominator + i128::from(square % denominator != 0))
    }

    fn objective_bound(&self) -> i128 {
        let open = self.open_vars();
        let limit = self.remaining_cardinality();
        let bound = match &self.problem.objective {
            ObjectiveForm::Linear(factor) => {
                self.upper(factor, self.factor_fixed[0], &open, limit)
            }
            ObjectiveForm::Product(left, right) => {
                let (a, b) = (self.factor_fixed[0], self.factor_fixed[1]);
                let a_lo = self.lower(left, a, &open, limit);
                let a_hi = self.upper(left, a, &open, limit);
                let b_lo = self.lower(right, b, &open, limit);
                let b_hi = self.upper(right, b, &open, limit);
                let corners = [(a_lo, b_lo), (a_lo, b_hi), (a_hi, b_lo), (a_hi, b_hi)]
                    .into_iter()
                    .map(|(x, y)| x.saturating_mul(y))
                    .max()
                    .unwrap_or(i128::MIN);
                match self.blend_bound(&open, limit) {
                    Some(blended) => corners.min(blended),
                    None => corners,
                }
            }
        };
        let (_, upper) = self.problem.int_domains[self.problem.objective_var];
        bound.min(upper as i128)
    }

    fn try_zero_completion(&mut self) {
        let rows_hold = self
            .problem
            .rows
            .iter()
            .zip(&self.row_fixed)
            .all(|(row, fixed)| *fixed <= row.rhs);
        if !rows_hold {
            return;
        }
        let value = match &self.problem.objective {
            ObjectiveForm::Linear(_) => self.factor_fixed[0],
            ObjectiveForm::Product(..) => {
                match self.factor_fixed[0].checked_mul(self.factor_fixed[1]) {
                    Some(value) => value,
                    None => return,
                }
            }
        };
        if self.best.is_some_and(|best| value <= best) {
            return;
        }
        let values: Vec<bool> = self.assigned.iter().map(|v| v.unwrap_or(false)).collect();
        if !self.problem.products_in_domain(&values) {
            return;
        }
        let (lower, upper) = self.problem.int_domains[self.problem.objective_var];
        if value < lower as i128 || value > upper as i128 {
            return;
        }
        let int_values = (0..self.problem.int_forms.len())
            .map(|index| clamp_to_i64(self.problem.eval_int(index, &values)))
            .collect();
        let objective = clamp_to_i64(value);
        self.statistics.solutions_found += 1;
        self.monitor.on_solution(objective);
        self.best = Some(value);
        self.incumbent = Some(Solution {
            values,
            int_values,
            objective,
        });
        let (left, right) = (self.factor_fixed[0], self.factor_fixed.get(1).copied());
        if let Some(blend) = right.and_then(|right| Blend::around(self.problem, left, right)) {
            self.blend = Some(blend);
        }
    }
}

fn clamp_to_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
