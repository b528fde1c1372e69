use super::builtins::{self, BuiltinContext};
use super::lexer::tokenize;
use super::parser::{is_identifier, parse_expression, parse_program, BinaryOp, Expr, Stmt, UnaryOp};
use super::value::{Matrix, Value, MAX_ELEMENTS};
use super::{EngineError, ScriptEngine, Workspace};
use crate::config::ExecutionConfig;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Script engine backed by the built-in evaluator.
///
/// Every `execute`/`evaluate` call opens a fresh session seeded from the
/// execution settings and drops it afterwards; nothing survives between calls.
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    config: ExecutionConfig,
    seeds: BTreeMap<String, Value>,
}

impl ScriptRuntime {
    /// Builds a runtime, evaluating the configured pre-bound variables once.
    pub fn new(config: ExecutionConfig) -> Result<Self, EngineError> {
        let mut seeds = BTreeMap::new();
        for (name, source) in &config.variables {
            if !is_identifier(name) {
                return Err(EngineError::Syntax {
                    line: 0,
                    message: format!("invalid pre-bound variable name '{}'", name),
                });
            }
            let expr = parse_expression(tokenize(source)?)?;
            let value = Session::begin(&config, BTreeMap::new()).eval(&expr)?;
            debug!(variable = %name, value = %value, "Pre-bound variable");
            seeds.insert(name.clone(), value);
        }
        Ok(Self { config, seeds })
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self {
            config: ExecutionConfig::default(),
            seeds: BTreeMap::new(),
        }
    }
}

impl ScriptEngine for ScriptRuntime {
    fn execute(&self, script: &str) -> Result<Workspace, EngineError> {
        let program = parse_program(tokenize(script)?)?;
        let mut session = Session::begin(&self.config, self.seeds.clone());
        session.run(&program)?;
        Ok(session.finish())
    }

    fn evaluate(&self, expression: &str) -> Result<Value, EngineError> {
        let expr = parse_expression(tokenize(expression)?)?;
        Session::begin(&self.config, BTreeMap::new()).eval(&expr)
    }
}

/// One execution: variable scope plus the settings it runs under.
struct Session<'a> {
    config: &'a ExecutionConfig,
    vars: BTreeMap<String, Value>,
    line: usize,
}

impl<'a> Session<'a> {
    fn begin(config: &'a ExecutionConfig, vars: BTreeMap<String, Value>) -> Self {
        Self {
            config,
            vars,
            line: 0,
        }
    }

    fn finish(self) -> Workspace {
        Workspace::new(self.vars)
    }

    fn fail(&self, message: impl Into<String>) -> EngineError {
        EngineError::Runtime {
            line: self.line,
            message: message.into(),
        }
    }

    fn run(&mut self, statements: &[Stmt]) -> Result<(), EngineError> {
        for statement in statements {
            self.exec(statement)?;
        }
        Ok(())
    }

    fn exec(&mut self, statement: &Stmt) -> Result<(), EngineError> {
        match statement {
            Stmt::Assign {
                target,
                fields,
                value,
                line,
            } => {
                self.line = *line;
                let value = self.eval(value)?;
                trace!(line, target = %target, "assign");
                self.assign(target, fields, value)
            }
            Stmt::Expr { expr, line } => {
                self.line = *line;
                self.eval(expr).map(|_| ())
            }
            Stmt::If {
                branches,
                otherwise,
                line,
            } => {
                for (condition, body) in branches {
                    self.line = *line;
                    let value = self.eval(condition)?;
                    if self.truthy(&value)? {
                        return self.run(body);
                    }
                }
                match otherwise {
                    Some(body) => self.run(body),
                    None => Ok(()),
                }
            }
        }
    }

    fn assign(&mut self, target: &str, fields: &[String], value: Value) -> Result<(), EngineError> {
        if fields.is_empty() {
            self.vars.insert(target.to_string(), value);
            return Ok(());
        }
        let slot = self
            .vars
            .entry(target.to_string())
            .or_insert_with(|| Value::Struct(BTreeMap::new()));
        set_field(slot, fields, value).map_err(|message| self.fail(message))
    }

    fn truthy(&self, value: &Value) -> Result<bool, EngineError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Num(n) if n.is_nan() => Err(self.fail("NaN cannot be used as a condition")),
            Value::Num(n) => Ok(*n != 0.0),
            Value::Matrix(m) if m.data.iter().any(|x| x.is_nan()) => {
                Err(self.fail("NaN cannot be used as a condition"))
            }
            Value::Matrix(m) => Ok(!m.is_empty() && m.data.iter().all(|x| *x != 0.0)),
            Value::Str(s) => Ok(!s.is_empty() && s.chars().all(|c| c != '\0')),
            other => Err(self.fail(format!(
                "a {} value cannot be used as a condition",
                other.type_name()
            ))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EngineError> {
        match expr {
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => match self.vars.get(name) {
                Some(value) => Ok(value.clone()),
                None => self.call(name, Vec::new()),
            },
            Expr::Matrix(rows) => {
                let rows = self.eval_rows(rows)?;
                let joined = rows
                    .into_iter()
                    .map(hconcat)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|m| self.fail(m))?;
                vconcat(joined).map_err(|m| self.fail(m))
            }
            Expr::Cell(rows) => {
                let rows = self.eval_rows(rows)?;
                Ok(Value::Cell(rows.into_iter().flatten().collect()))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, &value).map_err(|m| self.fail(m))
            }
            Expr::Binary(BinaryOp::AndAnd, lhs, rhs) => {
                let left = self.eval(lhs)?;
                if !self.truthy(&left)? {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(rhs)?;
                Ok(Value::Bool(self.truthy(&right)?))
            }
            Expr::Binary(BinaryOp::OrOr, lhs, rhs) => {
                let left = self.eval(lhs)?;
                if self.truthy(&left)? {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(rhs)?;
                Ok(Value::Bool(self.truthy(&right)?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                binary(*op, &left, &right).map_err(|m| self.fail(m))
            }
            Expr::Range { start, step, stop } => {
                let start = self.scalar(start, "range start")?;
                let step = match step {
                    Some(step) => self.scalar(step, "range step")?,
                    None => 1.0,
                };
                let stop = self.scalar(stop, "range end")?;
                range(start, step, stop).map_err(|m| self.fail(m))
            }
            Expr::Apply(callee, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Expr::Ident(name) = callee.as_ref() {
                    if !self.vars.contains_key(name) {
                        return self.call(name, args);
                    }
                }
                let target = self.eval(callee)?;
                index(&target, &args).map_err(|m| self.fail(m))
            }
            Expr::CellIndex(callee, args) => {
                let target = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                cell_index(&target, &args).map_err(|m| self.fail(m))
            }
            Expr::Field(base, field) => match self.eval(base)? {
                Value::Struct(mut fields) => fields
                    .remove(field)
                    .ok_or_else(|| {
                        self.fail(format!("reference to non-existent field '{}'", field))
                    }),
                other => Err(self.fail(format!(
                    "cannot read field '{}' of a {} value",
                    field,
                    other.type_name()
                ))),
            },
            Expr::Transpose(operand) => {
                let value = self.eval(operand)?;
                transpose(value).map_err(|m| self.fail(m))
            }
        }
    }

    fn eval_rows(&mut self, rows: &[Vec<Expr>]) -> Result<Vec<Vec<Value>>, EngineError> {
        rows.iter()
            .map(|row| row.iter().map(|item| self.eval(item)).collect())
            .collect()
    }

    fn scalar(&mut self, expr: &Expr, what: &str) -> Result<f64, EngineError> {
        let value = self.eval(expr)?;
        value
            .as_scalar()
            .ok_or_else(|| self.fail(format!("{} must be a scalar", what)))
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EngineError> {
        let context = BuiltinContext {
            config: self.config,
            variables: &self.vars,
        };
        match builtins::call(&context, name, args) {
            Some(result) => result.map_err(|m| self.fail(m)),
            None => Err(self.fail(format!("undefined variable or function '{}'", name))),
        }
    }
}

fn set_field(slot: &mut Value, fields: &[String], value: Value) -> Result<(), String> {
    if matches!(slot, Value::Matrix(m) if m.is_empty()) {
        *slot = Value::Struct(BTreeMap::new());
    }
    let Some((first, rest)) = fields.split_first() else {
        *slot = value;
        return Ok(());
    };
    match slot {
        Value::Struct(map) => {
            let child = map
                .entry(first.clone())
                .or_insert_with(|| Value::Struct(BTreeMap::new()));
            if rest.is_empty() {
                *child = value;
                Ok(())
            } else {
                set_field(child, rest, value)
            }
        }
        other => Err(format!(
            "cannot set field '{}' on a {} value",
            first,
            other.type_name()
        )),
    }
}

/// Numeric view used by operators; text contributes its character codes.
fn numeric(value: &Value, op: &str) -> Result<Matrix, String> {
    match value {
        Value::Str(s) => Ok(Matrix::row(s.chars().map(|c| c as u32 as f64).collect())),
        other => other.to_matrix().ok_or_else(|| {
            format!(
                "operator '{}' is not defined for {} values",
                op,
                other.type_name()
            )
        }),
    }
}

fn broadcast(
    a: &Matrix,
    b: &Matrix,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Matrix, String> {
    if a.rows == 1 && a.cols == 1 {
        let x = a.data[0];
        return Ok(Matrix::new(b.rows, b.cols, b.data.iter().map(|y| f(x, *y)).collect()));
    }
    if b.rows == 1 && b.cols == 1 {
        let y = b.data[0];
        return Ok(Matrix::new(a.rows, a.cols, a.data.iter().map(|x| f(*x, y)).collect()));
    }
    if a.rows != b.rows || a.cols != b.cols {
        return Err(format!(
            "matrix dimensions must agree for '{}' ({}x{} vs {}x{})",
            op, a.rows, a.cols, b.rows, b.cols
        ));
    }
    Ok(Matrix::new(
        a.rows,
        a.cols,
        a.data.iter().zip(&b.data).map(|(x, y)| f(*x, *y)).collect(),
    ))
}

fn logical(matrix: Matrix) -> Value {
    if matrix.rows == 1 && matrix.cols == 1 {
        Value::Bool(matrix.data[0] != 0.0)
    } else {
        Value::Matrix(matrix)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Pow => "^",
        BinaryOp::ElemMul => ".*",
        BinaryOp::ElemDiv => "./",
        BinaryOp::ElemPow => ".^",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "~=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::AndAnd => "&&",
        BinaryOp::OrOr => "||",
    };
    let a = numeric(left, symbol)?;
    let b = numeric(right, symbol)?;
    let scalar_operand = (a.rows == 1 && a.cols == 1) || (b.rows == 1 && b.cols == 1);
    let result = match op {
        BinaryOp::Add => broadcast(&a, &b, symbol, |x, y| x + y)?,
        BinaryOp::Sub => broadcast(&a, &b, symbol, |x, y| x - y)?,
        BinaryOp::ElemMul => broadcast(&a, &b, symbol, |x, y| x * y)?,
        BinaryOp::ElemDiv => broadcast(&a, &b, symbol, |x, y| x / y)?,
        BinaryOp::ElemPow => broadcast(&a, &b, symbol, f64::powf)?,
        BinaryOp::Mul if scalar_operand => broadcast(&a, &b, symbol, |x, y| x * y)?,
        BinaryOp::Mul => matrix_product(&a, &b)?,
        BinaryOp::Div if b.rows == 1 && b.cols == 1 => broadcast(&a, &b, symbol, |x, y| x / y)?,
        BinaryOp::Div => return Err("matrix right division is not supported".to_string()),
        BinaryOp::Pow if a.rows == 1 && a.cols == 1 && b.rows == 1 && b.cols == 1 => {
            broadcast(&a, &b, symbol, f64::powf)?
        }
        BinaryOp::Pow => return Err("use '.^' for elementwise powers of matrices".to_string()),
        BinaryOp::Eq => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x == y))?)),
        BinaryOp::Ne => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x != y))?)),
        BinaryOp::Lt => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x < y))?)),
        BinaryOp::Le => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x <= y))?)),
        BinaryOp::Gt => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x > y))?)),
        BinaryOp::Ge => return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x >= y))?)),
        BinaryOp::And | BinaryOp::AndAnd => {
            return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x != 0.0 && y != 0.0))?))
        }
        BinaryOp::Or | BinaryOp::OrOr => {
            return Ok(logical(broadcast(&a, &b, symbol, |x, y| flag(x != 0.0 || y != 0.0))?))
        }
    };
    Ok(Value::from_matrix(result))
}

fn matrix_product(a: &Matrix, b: &Matrix) -> Result<Matrix, String> {
    if a.cols != b.rows {
        return Err(format!(
            "inner matrix dimensions must agree ({}x{} * {}x{})",
            a.rows, a.cols, b.rows, b.cols
        ));
    }
    let mut data = Vec::with_capacity(Matrix::checked_len(a.rows, b.cols)?);
    for row in 0..a.rows {
        for col in 0..b.cols {
            data.push((0..a.cols).map(|k| a.get(row, k) * b.get(k, col)).sum());
        }
    }
    Ok(Matrix::new(a.rows, b.cols, data))
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, String> {
    match op {
        UnaryOp::Neg => {
            let m = numeric(value, "-")?;
            Ok(Value::from_matrix(Matrix::new(
                m.rows,
                m.cols,
                m.data.iter().map(|x| -x).collect(),
            )))
        }
        UnaryOp::Plus => Ok(Value::from_matrix(numeric(value, "+")?)),
        UnaryOp::Not => {
            let m = numeric(value, "~")?;
            Ok(logical(Matrix::new(
                m.rows,
                m.cols,
                m.data.iter().map(|x| flag(*x == 0.0)).collect(),
            )))
        }
    }
}

fn range(start: f64, step: f64, stop: f64) -> Result<Value, String> {
    let steps = (stop - start) / step;
    if step == 0.0 || !start.is_finite() || !stop.is_finite() || steps.is_nan() || steps < 0.0 {
        return Ok(Value::Matrix(Matrix::new(1, 0, Vec::new())));
    }
    // checked before the cast, which saturates
    let steps = (steps + 1e-10).floor();
    if steps >= MAX_ELEMENTS as f64 {
        return Err(format!("range produces more than {} elements", MAX_ELEMENTS));
    }
    let count = steps as usize + 1;
    let data = (0..count).map(|i| start + i as f64 * step).collect();
    Ok(Value::from_matrix(Matrix::row(data)))
}

fn transpose(value: Value) -> Result<Value, String> {
    match value {
        Value::Matrix(m) => Ok(Value::Matrix(m.transpose())),
        Value::Str(s) if s.chars().count() <= 1 => Ok(Value::Str(s)),
        Value::Str(_) => Err("transposing text is not supported".to_string()),
        other => Ok(other),
    }
}

/// Horizontal concatenation of one `[...]` row.
fn hconcat(items: Vec<Value>) -> Result<Value, String> {
    if items.len() == 1 {
        return Ok(items.into_iter().next().unwrap_or_else(Value::empty));
    }
    let is_blank = |v: &Value| matches!(v, Value::Matrix(m) if m.is_empty());
    if items.iter().any(|v| matches!(v, Value::Str(_))) {
        let mut text = String::new();
        for item in &items {
            match item {
                Value::Str(s) => text.push_str(s),
                v if is_blank(v) => {}
                other => {
                    return Err(format!(
                        "cannot concatenate text with a {} value",
                        other.type_name()
                    ))
                }
            }
        }
        return Ok(Value::Str(text));
    }
    if items.iter().any(|v| matches!(v, Value::Cell(_))) {
        let mut cells = Vec::new();
        for item in items {
            match item {
                Value::Cell(inner) => cells.extend(inner),
                v if is_blank(&v) => {}
                other => cells.push(other),
            }
        }
        return Ok(Value::Cell(cells));
    }
    let mut parts = Vec::new();
    for item in &items {
        let m = item
            .to_matrix()
            .ok_or_else(|| format!("cannot concatenate a {} value", item.type_name()))?;
        if !m.is_empty() {
            parts.push(m);
        }
    }
    let Some(rows) = parts.first().map(|m| m.rows) else {
        return Ok(Value::empty());
    };
    if parts.iter().any(|m| m.rows != rows) {
        return Err("dimensions of arrays being concatenated are not consistent".to_string());
    }
    let cols = parts.iter().map(|m| m.cols).sum();
    let mut data = Vec::with_capacity(Matrix::checked_len(rows, cols)?);
    for row in 0..rows {
        for part in &parts {
            data.extend_from_slice(&part.data[row * part.cols..(row + 1) * part.cols]);
        }
    }
    Ok(Value::from_matrix(Matrix::new(rows, cols, data)))
}

/// Vertical concatenation of the rows of a `[...]` literal.
fn vconcat(rows: Vec<Value>) -> Result<Value, String> {
    if rows.len() <= 1 {
        return Ok(rows.into_iter().next().unwrap_or_else(Value::empty));
    }
    if rows.iter().any(|v| matches!(v, Value::Cell(_))) {
        let mut cells = Vec::new();
        for row in rows {
            match row {
                Value::Cell(inner) => cells.extend(inner),
                other => cells.push(other),
            }
        }
        return Ok(Value::Cell(cells));
    }
    let mut parts = Vec::new();
    for row in &rows {
        if let Value::Str(_) = row {
            return Err("multi-row text is not supported".to_string());
        }
        let m = row
            .to_matrix()
            .ok_or_else(|| format!("cannot concatenate a {} value", row.type_name()))?;
        if !m.is_empty() {
            parts.push(m);
        }
    }
    let Some(cols) = parts.first().map(|m| m.cols) else {
        return Ok(Value::empty());
    };
    if parts.iter().any(|m| m.cols != cols) {
        return Err("dimensions of arrays being concatenated are not consistent".to_string());
    }
    let rows = parts.iter().map(|m| m.rows).sum();
    Matrix::checked_len(rows, cols)?;
    let data = parts.into_iter().flat_map(|m| m.data).collect();
    Ok(Value::from_matrix(Matrix::new(rows, cols, data)))
}

fn positions(arg: &Value) -> Result<Vec<usize>, String> {
    let m = match arg {
        Value::Num(_) | Value::Matrix(_) => arg.to_matrix().unwrap_or_else(Matrix::empty),
        other => return Err(format!("index must be numeric, not {}", other.type_name())),
    };
    m.data
        .iter()
        .map(|x| {
            if *x >= 1.0 && x.fract() == 0.0 {
                Ok(*x as usize)
            } else {
                Err(format!("index must be a positive integer, got {}", x))
            }
        })
        .collect()
}

fn out_of_bounds(position: usize, len: usize) -> String {
    format!("index {} exceeds the number of elements ({})", position, len)
}

fn index(target: &Value, args: &[Value]) -> Result<Value, String> {
    match (target, args) {
        (Value::Str(s), [arg]) => {
            let chars: Vec<char> = s.chars().collect();
            positions(arg)?
                .into_iter()
                .map(|p| chars.get(p - 1).copied().ok_or_else(|| out_of_bounds(p, chars.len())))
                .collect::<Result<String, _>>()
                .map(Value::Str)
        }
        (Value::Cell(items), [arg]) => positions(arg)?
            .into_iter()
            .map(|p| items.get(p - 1).cloned().ok_or_else(|| out_of_bounds(p, items.len())))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Cell),
        (Value::Struct(_), [arg]) => match positions(arg)?.as_slice() {
            [1] => Ok(target.clone()),
            _ => Err("struct index must be 1".to_string()),
        },
        (value, [arg]) => {
            let m = value
                .to_matrix()
                .ok_or_else(|| format!("cannot index a {} value", value.type_name()))?;
            let data = positions(arg)?
                .into_iter()
                .map(|p| m.linear(p).ok_or_else(|| out_of_bounds(p, m.data.len())))
                .collect::<Result<Vec<_>, _>>()?;
            if matches!(value, Value::Bool(_)) && data.len() == 1 {
                return Ok(value.clone());
            }
            Ok(Value::from_matrix(Matrix::row(data)))
        }
        (value, [row, col]) => {
            let m = value
                .to_matrix()
                .ok_or_else(|| format!("cannot index a {} value", value.type_name()))?;
            let (row, col) = match (positions(row)?.as_slice(), positions(col)?.as_slice()) {
                ([r], [c]) => (*r, *c),
                _ => return Err("two-dimensional indexing takes scalar subscripts".to_string()),
            };
            if row > m.rows || col > m.cols {
                return Err(format!(
                    "index ({}, {}) exceeds matrix dimensions ({}x{})",
                    row, col, m.rows, m.cols
                ));
            }
            Ok(Value::Num(m.get(row - 1, col - 1)))
        }
        _ => Err("indexing takes one or two subscripts".to_string()),
    }
}

fn cell_index(target: &Value, args: &[Value]) -> Result<Value, String> {
    let Value::Cell(items) = target else {
        return Err(format!(
            "brace indexing is not supported for {} values",
            target.type_name()
        ));
    };
    match args {
        [arg] => match positions(arg)?.as_slice() {
            [p] => items
                .get(p - 1)
                .cloned()
                .ok_or_else(|| out_of_bounds(*p, items.len())),
            _ => Err("brace indexing must select a single element".to_string()),
        },
        _ => Err("brace indexing takes one subscript".to_string()),
    }
}
