//! Formula evaluation.
//!
//! Raw cell text that does not start with `=` is its own value. A formula is
//! reduced in three steps:
//!
//! 1. Aggregate calls (`SUM`, `AVERAGE`/`AVG`, `COUNT`) over a reference or
//!    `REF:REF` range are replaced by their numeric result.
//! 2. Remaining bare references are replaced by the referenced cell's value,
//!    evaluating referenced formulas recursively.
//! 3. What is left must be plain arithmetic, which is parsed and computed.
//!
//! Every failure ends up as [`Value::Error`]; nothing is raised to the caller.
//! A set of cells currently being evaluated turns reference cycles into errors
//! instead of unbounded recursion.

use regex::Regex;
use thiserror::Error;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::arith::{ArithError, evaluate_arithmetic};
use super::cell_ref::{CellRange, CellRef};
use super::deps::cell_ref_re;
use super::value::{Value, parse_number};
use super::RefError;

/// Prefix that marks raw text as a formula.
pub const FORMULA_SIGIL: char = '=';

/// Nested formula references allowed before evaluation gives up.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Largest range an aggregate will read.
const MAX_RANGE_CELLS: usize = 1_000_000;

/// Read access to raw cell text for formula evaluation.
pub trait CellSource {
    /// Raw text of the cell, or `None` if it is empty/unpopulated.
    fn raw_value(&self, cell: &CellRef) -> Option<String>;
}

impl<F> CellSource for F
where
    F: Fn(&CellRef) -> Option<String>,
{
    fn raw_value(&self, cell: &CellRef) -> Option<String> {
        self(cell)
    }
}

/// Why a formula produced `#ERR`.
#[derive(Error, Debug)]
enum EvalError {
    #[error("circular reference through {0}")]
    Cycle(CellRef),

    #[error("formula references nested too deeply")]
    TooDeep,

    #[error(transparent)]
    Reference(RefError),

    #[error("range {0} is too large")]
    RangeTooLarge(CellRange),

    #[error("{0} does not hold a number")]
    NotNumeric(CellRef),

    #[error("unexpected '{0}' after substitution")]
    InvalidCharacter(char),

    #[error(transparent)]
    Arithmetic(ArithError),
}

/// True if raw text is a formula.
pub fn is_formula(raw: &str) -> bool {
    raw.starts_with(FORMULA_SIGIL)
}

/// Evaluate raw cell text against a grid.
pub fn evaluate<S: CellSource + ?Sized>(raw: &str, source: &S) -> Value {
    Evaluator::new(source).run(raw)
}

/// Evaluate the raw text that lives at `origin`, so a formula referencing its
/// own cell is reported as a cycle immediately.
pub fn evaluate_cell<S: CellSource + ?Sized>(origin: CellRef, raw: &str, source: &S) -> Value {
    try_evaluate_cell(origin, raw, source).unwrap_or(Value::Error)
}

/// Like [`evaluate_cell`], but says why the result would be `#ERR`.
pub fn try_evaluate_cell<S: CellSource + ?Sized>(
    origin: CellRef,
    raw: &str,
    source: &S,
) -> Result<Value, String> {
    let mut evaluator = Evaluator::new(source);
    evaluator.in_progress.insert(origin);
    evaluator.try_run(raw).map_err(|err| err.to_string())
}

struct Evaluator<'a, S: ?Sized> {
    source: &'a S,
    in_progress: HashSet<CellRef>,
    memo: HashMap<CellRef, Value>,
}

impl<'a, S: CellSource + ?Sized> Evaluator<'a, S> {
    fn new(source: &'a S) -> Self {
        Evaluator {
            source,
            in_progress: HashSet::new(),
            memo: HashMap::new(),
        }
    }

    fn run(&mut self, raw: &str) -> Value {
        self.try_run(raw).unwrap_or(Value::Error)
    }

    fn try_run(&mut self, raw: &str) -> Result<Value, EvalError> {
        match raw.strip_prefix(FORMULA_SIGIL) {
            Some(body) => self.formula(body),
            None => Ok(Value::Text(raw.to_string())),
        }
    }

    fn formula(&mut self, body: &str) -> Result<Value, EvalError> {
        let reduced = self.substitute_aggregates(body)?;
        let expr = self.substitute_references(&reduced)?;
        if let Some(bad) = expr.chars().find(|c| !is_arithmetic_char(*c)) {
            return Err(EvalError::InvalidCharacter(bad));
        }
        evaluate_arithmetic(&expr)
            .map(Value::Number)
            .map_err(EvalError::Arithmetic)
    }

    /// Value of a referenced cell, evaluating it if it holds a formula.
    fn resolve(&mut self, cell: CellRef) -> Result<Value, EvalError> {
        if let Some(value) = self.memo.get(&cell) {
            return Ok(value.clone());
        }
        if self.in_progress.contains(&cell) {
            return Err(EvalError::Cycle(cell));
        }

        let raw = self.source.raw_value(&cell).unwrap_or_default();
        let Some(body) = raw.strip_prefix(FORMULA_SIGIL) else {
            return Ok(Value::Text(raw));
        };
        if self.in_progress.len() >= MAX_EVAL_DEPTH {
            return Err(EvalError::TooDeep);
        }

        self.in_progress.insert(cell);
        let result = self.formula(body);
        self.in_progress.remove(&cell);

        let value = match result {
            Ok(value) => value,
            // Cycles poison everything that reaches them.
            Err(err @ (EvalError::Cycle(_) | EvalError::TooDeep)) => return Err(err),
            Err(_) => Value::Error,
        };
        self.memo.insert(cell, value.clone());
        Ok(value)
    }

    fn substitute_aggregates(&mut self, body: &str) -> Result<String, EvalError> {
        let mut out = String::with_capacity(body.len());
        let mut last = 0;
        for caps in aggregate_re().captures_iter(body) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let range = CellRange::parse(&caps[2]).map_err(EvalError::Reference)?;
            if range.len() > MAX_RANGE_CELLS {
                return Err(EvalError::RangeTooLarge(range));
            }

            let mut values = Vec::with_capacity(range.len());
            for cell in range.cells() {
                values.push(self.resolve(cell)?);
            }

            out.push_str(&body[last..whole.start()]);
            out.push_str(&number_literal(aggregate(&caps[1], &values)));
            last = whole.end();
        }
        out.push_str(&body[last..]);
        Ok(out)
    }

    fn substitute_references(&mut self, expr: &str) -> Result<String, EvalError> {
        let mut out = String::with_capacity(expr.len());
        let mut last = 0;
        for caps in cell_ref_re().captures_iter(expr) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let cell: CellRef = caps[1].parse().map_err(EvalError::Reference)?;
            let literal = match self.resolve(cell)? {
                Value::Number(n) => number_literal(n),
                Value::Text(text) if text.trim().is_empty() => "0".to_string(),
                Value::Text(text) => match parse_number(&text) {
                    Some(n) => number_literal(n),
                    // Spliced as a group; anything non-arithmetic fails the character check.
                    None => format!("({})", text.trim()),
                },
                Value::Error => return Err(EvalError::NotNumeric(cell)),
            };
            out.push_str(&expr[last..whole.start()]);
            out.push_str(&literal);
            last = whole.end();
        }
        out.push_str(&expr[last..]);
        Ok(out)
    }
}

fn aggregate(name: &str, values: &[Value]) -> f64 {
    let numbers = values.iter().filter_map(Value::as_number);
    match name.to_ascii_uppercase().as_str() {
        "SUM" => numbers.sum(),
        "AVERAGE" | "AVG" => {
            let (total, count) = numbers.fold((0.0, 0usize), |(t, c), n| (t + n, c + 1));
            if count == 0 { 0.0 } else { total / count as f64 }
        }
        // COUNT: anything that is neither blank nor an error.
        _ => values
            .iter()
            .filter(|v| !v.is_blank() && !v.is_error())
            .count() as f64,
    }
}

/// Render a number so it can be spliced back into an arithmetic expression.
fn number_literal(n: f64) -> String {
    if n < 0.0 {
        format!("({})", n)
    } else {
        format!("{}", n)
    }
}

fn is_arithmetic_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ' ')
}

fn aggregate_re() -> &'static Regex {
    static AGG_RE: OnceLock<Regex> = OnceLock::new();
    AGG_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(SUM|AVERAGE|AVG|COUNT)\s*\(([^()]*)\)")
            .expect("aggregate regex must compile")
    })
}
