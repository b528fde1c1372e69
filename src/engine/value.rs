use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A value produced by evaluating script text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
    Matrix(Matrix),
    Cell(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

/// Largest number of elements a single matrix may hold.
pub const MAX_ELEMENTS: usize = 1_000_000;

/// Dense numeric matrix stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(rows * cols, data.len());
        Self { rows, cols, data }
    }

    pub fn empty() -> Self {
        Self::new(0, 0, Vec::new())
    }

    /// Element count of a `rows` x `cols` matrix, refusing anything over
    /// [`MAX_ELEMENTS`].
    pub fn checked_len(rows: usize, cols: usize) -> Result<usize, String> {
        rows.checked_mul(cols)
            .filter(|len| *len <= MAX_ELEMENTS)
            .ok_or_else(|| {
                format!(
                    "a {}x{} matrix exceeds the limit of {} elements",
                    rows, cols, MAX_ELEMENTS
                )
            })
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self::new(rows, cols, vec![value; rows * cols])
    }

    pub fn row(data: Vec<f64>) -> Self {
        Self::new(1, data.len(), data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for col in 0..self.cols {
            for row in 0..self.rows {
                data.push(self.get(row, col));
            }
        }
        Self::new(self.cols, self.rows, data)
    }

    /// Linear (1-based) indexing follows column-major order.
    pub fn linear(&self, index: usize) -> Option<f64> {
        if index == 0 || index > self.data.len() {
            return None;
        }
        let zero = index - 1;
        let (row, col) = (zero % self.rows.max(1), zero / self.rows.max(1));
        Some(self.get(row, col))
    }
}

impl Value {
    pub fn empty() -> Self {
        Value::Matrix(Matrix::empty())
    }

    /// Collapses 1x1 matrices to scalars.
    pub fn from_matrix(matrix: Matrix) -> Self {
        if matrix.rows == 1 && matrix.cols == 1 {
            Value::Num(matrix.data[0])
        } else {
            Value::Matrix(matrix)
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "logical",
            Value::Num(_) => "double",
            Value::Str(_) => "char",
            Value::Matrix(_) => "matrix",
            Value::Cell(_) => "cell",
            Value::Struct(_) => "struct",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Bool(_) | Value::Num(_) => false,
            Value::Str(s) => s.is_empty(),
            Value::Matrix(m) => m.is_empty(),
            Value::Cell(items) => items.is_empty(),
            Value::Struct(_) => false,
        }
    }

    pub fn numel(&self) -> usize {
        match self {
            Value::Bool(_) | Value::Num(_) | Value::Struct(_) => 1,
            Value::Str(s) => s.chars().count(),
            Value::Matrix(m) => m.data.len(),
            Value::Cell(items) => items.len(),
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        match self {
            Value::Matrix(m) => (m.rows, m.cols),
            Value::Str(s) if s.is_empty() => (0, 0),
            Value::Cell(items) if items.is_empty() => (0, 0),
            Value::Str(_) | Value::Cell(_) => (1, self.numel()),
            _ => (1, 1),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn to_matrix(&self) -> Option<Matrix> {
        match self {
            Value::Matrix(m) => Some(m.clone()),
            other => other.as_scalar().map(|n| Matrix::new(1, 1, vec![n])),
        }
    }

    /// Structural equality that treats NaN as equal to itself.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => same_number(*a, *b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Matrix(a), Value::Matrix(b)) => {
                a.rows == b.rows
                    && a.cols == b.cols
                    && a.data.iter().zip(&b.data).all(|(x, y)| same_number(*x, *y))
            }
            (Value::Cell(a), Value::Cell(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equivalent(vb))
            }
            _ => false,
        }
    }
}

fn same_number(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Renders a number the way it would be written in a script.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{:?}", n)
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quotes text, spelling control characters as `char(n)` so the result
/// stays on one line: `['a', char(10), 'b']`.
fn render_text(s: &str) -> String {
    if !s.chars().any(char::is_control) {
        return quote(s);
    }
    let mut parts = Vec::new();
    let mut run = String::new();
    for c in s.chars() {
        if c.is_control() {
            if !run.is_empty() {
                parts.push(quote(&run));
                run.clear();
            }
            parts.push(format!("char({})", u32::from(c)));
        } else {
            run.push(c);
        }
    }
    if !run.is_empty() {
        parts.push(quote(&run));
    }
    format!("[{}]", parts.join(", "))
}

/// Source-text rendering; the output evaluates back to an equivalent value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", render_text(s)),
            Value::Matrix(m) => {
                if m.is_empty() {
                    if m.rows == 0 && m.cols == 0 {
                        return write!(f, "[]");
                    }
                    return write!(f, "zeros({}, {})", m.rows, m.cols);
                }
                write!(f, "[")?;
                for row in 0..m.rows {
                    if row > 0 {
                        write!(f, "; ")?;
                    }
                    for col in 0..m.cols {
                        if col > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", format_number(m.get(row, col)))?;
                    }
                }
                write!(f, "]")
            }
            Value::Cell(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Struct(fields) => {
                write!(f, "struct(")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}, {}", quote(name), value)?;
                }
                write!(f, ")")
            }
        }
    }
}
