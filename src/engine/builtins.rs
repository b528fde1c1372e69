//! Functions callable from config scripts.

use super::value::{format_number, Matrix, Value};
use crate::config::{ExecutionConfig, Platform};
use std::collections::BTreeMap;
use tracing::debug;

/// What a builtin may look at besides its arguments.
pub struct BuiltinContext<'a> {
    pub config: &'a ExecutionConfig,
    pub variables: &'a BTreeMap<String, Value>,
}

const NAMES: &[&str] = &[
    "true", "false", "pi", "eps", "NaN", "nan", "Inf", "inf", "ispc", "isunix", "ismac", "getenv",
    "exist", "strcmp", "strcmpi", "isempty", "numel", "length", "size", "isnan", "isnumeric",
    "ischar", "islogical", "iscell", "isstruct", "isfield", "zeros", "ones", "struct", "fullfile",
    "num2str", "upper", "lower", "abs", "floor", "ceil", "round", "min", "max", "sum", "mod",
    "char", "disp", "error",
];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Calls builtin `name`; `None` when no such builtin exists.
pub fn call(
    context: &BuiltinContext<'_>,
    name: &str,
    args: Vec<Value>,
) -> Option<Result<Value, String>> {
    if !is_builtin(name) {
        return None;
    }
    Some(dispatch(context, name, args))
}

fn dispatch(context: &BuiltinContext<'_>, name: &str, args: Vec<Value>) -> Result<Value, String> {
    let platform = context.config.platform;
    match name {
        "true" => constant(name, &args, Value::Bool(true)),
        "false" => constant(name, &args, Value::Bool(false)),
        "pi" => constant(name, &args, Value::Num(std::f64::consts::PI)),
        "eps" => constant(name, &args, Value::Num(f64::EPSILON)),
        "NaN" | "nan" => filled(name, &args, f64::NAN),
        "Inf" | "inf" => filled(name, &args, f64::INFINITY),
        "zeros" => filled(name, &args, 0.0),
        "ones" => filled(name, &args, 1.0),
        "ispc" => constant(name, &args, Value::Bool(platform == Platform::Windows)),
        "isunix" => constant(name, &args, Value::Bool(platform != Platform::Windows)),
        "ismac" => constant(name, &args, Value::Bool(platform == Platform::Macos)),
        "getenv" => {
            let [key] = arity::<1>(name, args)?;
            let key = text(name, &key)?;
            Ok(Value::Str(context.config.lookup_env(&key).unwrap_or_default()))
        }
        "exist" => exist(context, name, args),
        "strcmp" | "strcmpi" => {
            let [a, b] = arity::<2>(name, args)?;
            let same = match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) if name == "strcmpi" => x.to_lowercase() == y.to_lowercase(),
                (Some(x), Some(y)) => x == y,
                _ => false,
            };
            Ok(Value::Bool(same))
        }
        "isempty" => one(name, args, |v| Ok(Value::Bool(v.is_empty()))),
        "numel" => one(name, args, |v| Ok(Value::Num(v.numel() as f64))),
        "length" => one(name, args, |v| {
            let (rows, cols) = v.dims();
            let len = if rows == 0 || cols == 0 { 0 } else { rows.max(cols) };
            Ok(Value::Num(len as f64))
        }),
        "size" => size(name, args),
        "isnan" => one(name, args, |v| match v {
            Value::Str(s) => Ok(Value::from_matrix(Matrix::filled(1, s.chars().count(), 0.0))),
            other => {
                let m = numbers(name, &other)?;
                let flags = m.data.iter().map(|x| if x.is_nan() { 1.0 } else { 0.0 }).collect();
                Ok(logical(Matrix::new(m.rows, m.cols, flags)))
            }
        }),
        "isnumeric" => one(name, args, |v| {
            Ok(Value::Bool(matches!(v, Value::Num(_) | Value::Matrix(_))))
        }),
        "ischar" => one(name, args, |v| Ok(Value::Bool(matches!(v, Value::Str(_))))),
        "islogical" => one(name, args, |v| Ok(Value::Bool(matches!(v, Value::Bool(_))))),
        "iscell" => one(name, args, |v| Ok(Value::Bool(matches!(v, Value::Cell(_))))),
        "isstruct" => one(name, args, |v| Ok(Value::Bool(matches!(v, Value::Struct(_))))),
        "isfield" => {
            let [s, field] = arity::<2>(name, args)?;
            let field = text(name, &field)?;
            Ok(Value::Bool(
                matches!(s, Value::Struct(ref fields) if fields.contains_key(&field)),
            ))
        }
        "struct" => make_struct(name, args),
        "fullfile" => fullfile(name, platform, args),
        "num2str" => one(name, args, |v| match v {
            Value::Str(s) => Ok(Value::Str(s)),
            other => {
                let m = numbers(name, &other)?;
                let parts: Vec<String> = m.data.iter().map(|x| format_number(*x)).collect();
                Ok(Value::Str(parts.join("  ")))
            }
        }),
        "char" => one(name, args, |v| match v {
            Value::Str(s) => Ok(Value::Str(s)),
            other => numbers(name, &other)?
                .data
                .iter()
                .map(|code| {
                    char_from_code(*code).ok_or_else(|| {
                        format!("char() cannot convert {} to a character", format_number(*code))
                    })
                })
                .collect::<Result<String, String>>()
                .map(Value::Str),
        }),
        "upper" => one(name, args, |v| Ok(Value::Str(text(name, &v)?.to_uppercase()))),
        "lower" => one(name, args, |v| Ok(Value::Str(text(name, &v)?.to_lowercase()))),
        "abs" => map_numbers(name, args, f64::abs),
        "floor" => map_numbers(name, args, f64::floor),
        "ceil" => map_numbers(name, args, f64::ceil),
        "round" => map_numbers(name, args, f64::round),
        "min" => extremum(name, args, f64::min),
        "max" => extremum(name, args, f64::max),
        "sum" => one(name, args, |v| {
            let m = numbers(name, &v)?;
            if m.rows <= 1 || m.cols == 1 {
                return Ok(Value::Num(m.data.iter().sum()));
            }
            let sums = (0..m.cols)
                .map(|col| (0..m.rows).map(|row| m.get(row, col)).sum())
                .collect();
            Ok(Value::Matrix(Matrix::row(sums)))
        }),
        "mod" => {
            let [a, b] = arity::<2>(name, args)?;
            let (a, b) = (numbers(name, &a)?, numbers(name, &b)?);
            let modulo = |x: f64, y: f64| if y == 0.0 { x } else { x - (x / y).floor() * y };
            pairwise(name, &a, &b, modulo)
        }
        "disp" => one(name, args, |v| {
            debug!(target: "cfgedit::script", "{}", v);
            Ok(Value::empty())
        }),
        "error" => {
            let message = match args.first() {
                Some(Value::Str(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "error() called".to_string(),
            };
            Err(message)
        }
        _ => Err(format!("builtin '{}' is not implemented", name)),
    }
}

fn arity<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], String> {
    let count = args.len();
    args.try_into()
        .map_err(|_| format!("{}() expects {} argument(s), got {}", name, N, count))
}

fn one(
    name: &str,
    args: Vec<Value>,
    f: impl FnOnce(Value) -> Result<Value, String>,
) -> Result<Value, String> {
    let [value] = arity::<1>(name, args)?;
    f(value)
}

fn constant(name: &str, args: &[Value], value: Value) -> Result<Value, String> {
    if args.is_empty() {
        Ok(value)
    } else {
        Err(format!("{}() takes no arguments", name))
    }
}

fn text(name: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{}() expects text, got {}", name, value.type_name()))
}

fn numbers(name: &str, value: &Value) -> Result<Matrix, String> {
    value
        .to_matrix()
        .ok_or_else(|| format!("{}() expects numbers, got {}", name, value.type_name()))
}

fn count(name: &str, value: &Value) -> Result<usize, String> {
    match value.as_scalar() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(format!("{}() dimensions must be non-negative integers", name)),
    }
}

fn logical(matrix: Matrix) -> Value {
    if matrix.rows == 1 && matrix.cols == 1 {
        Value::Bool(matrix.data[0] != 0.0)
    } else {
        Value::Matrix(matrix)
    }
}

/// `zeros()`, `zeros(n)`, `zeros(r, c)` and friends.
fn filled(name: &str, args: &[Value], fill: f64) -> Result<Value, String> {
    let (rows, cols) = match args {
        [] => (1, 1),
        [n] => (count(name, n)?, count(name, n)?),
        [r, c] => (count(name, r)?, count(name, c)?),
        _ => return Err(format!("{}() takes at most two dimensions", name)),
    };
    Matrix::checked_len(rows, cols)?;
    Ok(Value::from_matrix(Matrix::filled(rows, cols, fill)))
}

fn char_from_code(code: f64) -> Option<char> {
    if code.fract() != 0.0 || code < 0.0 || code > u32::MAX as f64 {
        return None;
    }
    char::from_u32(code as u32)
}

fn exist(context: &BuiltinContext<'_>, name: &str, args: Vec<Value>) -> Result<Value, String> {
    let (target, kind) = match args.as_slice() {
        [target] => (text(name, target)?, None),
        [target, kind] => (text(name, target)?, Some(text(name, kind)?)),
        _ => return Err("exist() expects one or two arguments".to_string()),
    };
    let code = if context.variables.contains_key(&target) {
        1.0
    } else if kind.as_deref() != Some("var") && is_builtin(&target) {
        5.0
    } else {
        0.0
    };
    Ok(Value::Num(code))
}

fn size(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match args.as_slice() {
        [value] => {
            let (rows, cols) = value.dims();
            Ok(Value::Matrix(Matrix::row(vec![rows as f64, cols as f64])))
        }
        [value, dim] => {
            let (rows, cols) = value.dims();
            match count(name, dim)? {
                1 => Ok(Value::Num(rows as f64)),
                2 => Ok(Value::Num(cols as f64)),
                0 => Err("size() dimension must be positive".to_string()),
                _ => Ok(Value::Num(1.0)),
            }
        }
        _ => Err("size() expects one or two arguments".to_string()),
    }
}

fn make_struct(name: &str, args: Vec<Value>) -> Result<Value, String> {
    if args.len() % 2 != 0 {
        return Err("struct() expects field/value pairs".to_string());
    }
    let mut fields = BTreeMap::new();
    let mut args = args.into_iter();
    while let (Some(key), Some(value)) = (args.next(), args.next()) {
        fields.insert(text(name, &key)?, value);
    }
    Ok(Value::Struct(fields))
}

fn fullfile(name: &str, platform: Platform, args: Vec<Value>) -> Result<Value, String> {
    let separator = platform.path_separator();
    let mut path = String::new();
    for part in &args {
        let part = text(name, part)?;
        if part.is_empty() {
            continue;
        }
        if path.is_empty() {
            path = part;
            continue;
        }
        let is_sep = |c: char| c == '/' || c == separator;
        let trimmed = path.trim_end_matches(is_sep).len();
        path.truncate(trimmed);
        path.push(separator);
        path.push_str(part.trim_start_matches(is_sep));
    }
    Ok(Value::Str(path))
}

fn map_numbers(name: &str, args: Vec<Value>, f: fn(f64) -> f64) -> Result<Value, String> {
    one(name, args, |v| {
        let m = numbers(name, &v)?;
        let data = m.data.iter().map(|x| f(*x)).collect();
        Ok(Value::from_matrix(Matrix::new(m.rows, m.cols, data)))
    })
}

fn pairwise(
    name: &str,
    a: &Matrix,
    b: &Matrix,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let scalar = |m: &Matrix| m.rows == 1 && m.cols == 1;
    let data = if scalar(a) {
        Matrix::new(b.rows, b.cols, b.data.iter().map(|y| f(a.data[0], *y)).collect())
    } else if scalar(b) {
        Matrix::new(a.rows, a.cols, a.data.iter().map(|x| f(*x, b.data[0])).collect())
    } else if a.rows == b.rows && a.cols == b.cols {
        Matrix::new(
            a.rows,
            a.cols,
            a.data.iter().zip(&b.data).map(|(x, y)| f(*x, *y)).collect(),
        )
    } else {
        return Err(format!("{}() arguments must have matching sizes", name));
    };
    Ok(Value::from_matrix(data))
}

fn extremum(name: &str, args: Vec<Value>, f: fn(f64, f64) -> f64) -> Result<Value, String> {
    match args.as_slice() {
        [value] => {
            let m = numbers(name, value)?;
            Ok(m.data
                .iter()
                .copied()
                .reduce(f)
                .map(Value::Num)
                .unwrap_or_else(Value::empty))
        }
        [a, b] => pairwise(name, &numbers(name, a)?, &numbers(name, b)?, f),
        _ => Err(format!("{}() expects one or two arguments", name)),
    }
}
