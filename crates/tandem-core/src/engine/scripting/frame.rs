//! `DataFrame` type exposed to scripts.
//!
//! A [`Frame`] is the interpreter-native copy of the dataset. Every method
//! returns a new frame or a plain value; nothing mutates the rows in place,
//! so the frame bound to `df` always reflects the loaded dataset.
//!
//! Row maps (`row`, `rows`, `filter` callbacks) and `dtypes` are rhai object
//! maps, which keep their keys sorted by name. `row_values` and `columns`
//! give schema order.

use std::cmp::Ordering;
use std::sync::Arc;

use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, INT, ImmutableString, Map, NativeCallContext,
};
use rustc_hash::FxHashSet;

use crate::dataset::{Column, ColumnType, Dataset, Value};
use crate::engine::render::render_table;

type FrameResult<T> = Result<T, Box<EvalAltResult>>;

/// Rows shown by `head()` / `tail()` without an argument.
const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Immutable tabular value bound into the script scope.
#[derive(Debug, Clone)]
pub struct Frame {
    columns: Arc<Vec<Column>>,
    rows: Arc<Vec<Vec<Value>>>,
}

impl Frame {
    /// View over the dataset's rows; nothing is copied.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            columns: dataset.shared_schema(),
            rows: dataset.shared_rows(),
        }
    }

    fn derive(&self, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Arc::clone(&self.columns),
            rows: Arc::new(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    fn column_index(&self, name: &str) -> FrameResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| format!("column '{name}' not found").into())
    }

    fn row_index(&self, index: INT) -> FrameResult<usize> {
        let len = self.len() as INT;
        let resolved = if index < 0 { len + index } else { index };
        if (0..len).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(format!("row index {index} out of range for {len} rows").into())
        }
    }

    fn shape(&self) -> Array {
        vec![Dynamic::from(self.len() as INT), Dynamic::from(self.width() as INT)]
    }

    fn column_names(&self) -> Array {
        self.columns
            .iter()
            .map(|c| Dynamic::from(c.name.clone()))
            .collect()
    }

    fn dtypes(&self) -> Map {
        self.columns
            .iter()
            .map(|c| (c.name.as_str().into(), Dynamic::from(c.ty.name().to_string())))
            .collect()
    }

    fn head(&self, n: INT) -> Self {
        let n = (n.max(0) as usize).min(self.len());
        self.derive(self.rows[..n].to_vec())
    }

    fn tail(&self, n: INT) -> Self {
        let n = (n.max(0) as usize).min(self.len());
        self.derive(self.rows[self.len() - n..].to_vec())
    }

    fn column(&self, name: &str) -> FrameResult<Array> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| to_dynamic(&row[idx])).collect())
    }

    fn row_map(&self, row: &[Value]) -> Map {
        self.columns
            .iter()
            .zip(row)
            .map(|(c, v)| (c.name.as_str().into(), to_dynamic(v)))
            .collect()
    }

    fn row(&self, index: INT) -> FrameResult<Map> {
        let idx = self.row_index(index)?;
        Ok(self.row_map(&self.rows[idx]))
    }

    fn row_values(&self, index: INT) -> FrameResult<Array> {
        let idx = self.row_index(index)?;
        Ok(self.rows[idx].iter().map(to_dynamic).collect())
    }

    fn all_rows(&self) -> Array {
        self.rows
            .iter()
            .map(|row| Dynamic::from_map(self.row_map(row)))
            .collect()
    }

    fn select(&self, names: Array) -> FrameResult<Self> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .into_immutable_string()
                .map_err(|ty| format!("select() expects column names, found {ty}"))?;
            indices.push(self.column_index(&name)?);
        }

        let columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(Self {
            columns: Arc::new(columns),
            rows: Arc::new(rows),
        })
    }

    fn filter(&self, ctx: &NativeCallContext, predicate: &FnPtr) -> FrameResult<Self> {
        let mut kept = Vec::new();
        for row in self.rows.iter() {
            let keep: bool = predicate.call_within_context(ctx, (self.row_map(row),))?;
            if keep {
                kept.push(row.clone());
            }
        }
        Ok(self.derive(kept))
    }

    fn sort_by(&self, name: &str, descending: bool) -> FrameResult<Self> {
        let idx = self.column_index(name)?;
        let mut rows = self.rows.to_vec();
        rows.sort_by(|a, b| match (a[idx].is_null(), b[idx].is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = compare_values(&a[idx], &b[idx]);
                if descending { ord.reverse() } else { ord }
            }
        });
        Ok(self.derive(rows))
    }

    fn present_values(&self, name: &str) -> FrameResult<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]).filter(|v| !v.is_null()))
    }

    fn numeric_values(&self, name: &str) -> FrameResult<Vec<&Value>> {
        let values: Vec<&Value> = self.present_values(name)?.collect();
        if let Some(bad) = values.iter().find(|v| v.as_f64().is_none()) {
            return Err(format!(
                "column '{name}' is not numeric: found {} value '{bad}'",
                bad.type_name()
            )
            .into());
        }
        Ok(values)
    }

    fn sum(&self, name: &str) -> FrameResult<Dynamic> {
        let values = self.numeric_values(name)?;
        let mut int_total: Option<INT> = Some(0);
        let mut float_total = 0.0;
        for value in &values {
            if let Value::Int(i) = value {
                int_total = int_total.and_then(|t| t.checked_add(*i));
            } else {
                int_total = None;
            }
            float_total += value.as_f64().unwrap_or_default();
        }
        Ok(match int_total {
            Some(total) => Dynamic::from(total),
            None => Dynamic::from(float_total),
        })
    }

    fn mean(&self, name: &str) -> FrameResult<Dynamic> {
        let values = self.numeric_values(name)?;
        if values.is_empty() {
            return Ok(Dynamic::UNIT);
        }
        let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
        Ok(Dynamic::from(total / values.len() as f64))
    }

    fn extreme(&self, name: &str, wanted: Ordering) -> FrameResult<Dynamic> {
        let best = self
            .present_values(name)?
            .reduce(|best, v| if compare_values(v, best) == wanted { v } else { best });
        Ok(best.map_or(Dynamic::UNIT, to_dynamic))
    }

    fn count(&self, name: &str) -> FrameResult<INT> {
        Ok(self.present_values(name)?.count() as INT)
    }

    fn unique(&self, name: &str) -> FrameResult<Array> {
        let idx = self.column_index(name)?;
        let mut seen = FxHashSet::default();
        let mut distinct = Array::new();
        for row in self.rows.iter() {
            let value = &row[idx];
            if seen.insert((value.type_name(), value.to_string())) {
                distinct.push(to_dynamic(value));
            }
        }
        Ok(distinct)
    }

    fn value_counts(&self, name: &str) -> FrameResult<Map> {
        let idx = self.column_index(name)?;
        let mut counts = Map::new();
        for row in self.rows.iter() {
            let key = match &row[idx] {
                Value::Null => "null".to_string(),
                other => other.to_string(),
            };
            let slot = counts.entry(key.into()).or_insert_with(|| Dynamic::from(0 as INT));
            *slot = Dynamic::from(slot.as_int().unwrap_or(0) + 1);
        }
        Ok(counts)
    }

    /// Same layout as the relational engine's result tables.
    pub fn render(&self) -> String {
        let headers: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        render_table(
            &headers,
            self.rows
                .iter()
                .map(|row| row.iter().map(ToString::to_string).collect::<Vec<_>>()),
        )
    }

    /// Table text without the final newline; `print` adds its own.
    fn display(&self) -> String {
        let mut text = self.render();
        text.truncate(text.trim_end_matches('\n').len());
        text
    }
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Text(s) => Dynamic::from(s.clone()),
    }
}

fn type_rank(value: &Value) -> u8 {
    match ColumnType::of(value) {
        ColumnType::Null => 0,
        ColumnType::Boolean => 1,
        ColumnType::Integer | ColumnType::Float => 2,
        _ => 3,
    }
}

/// Total order over values: numbers numerically, text lexicographically,
/// different kinds by a fixed rank.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

/// Register the `DataFrame` type and its methods.
pub fn register_frame_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<Frame>("DataFrame")
        .register_get("shape", |f: &mut Frame| f.shape())
        .register_get("columns", |f: &mut Frame| f.column_names())
        .register_get("dtypes", |f: &mut Frame| f.dtypes())
        .register_fn("len", |f: &mut Frame| f.len() as INT)
        .register_fn("is_empty", |f: &mut Frame| f.is_empty())
        .register_fn("head", |f: &mut Frame| f.head(DEFAULT_PREVIEW_ROWS as INT))
        .register_fn("head", |f: &mut Frame, n: INT| f.head(n))
        .register_fn("tail", |f: &mut Frame| f.tail(DEFAULT_PREVIEW_ROWS as INT))
        .register_fn("tail", |f: &mut Frame, n: INT| f.tail(n))
        .register_fn("col", |f: &mut Frame, name: &str| f.column(name))
        .register_fn("row", |f: &mut Frame, index: INT| f.row(index))
        .register_fn("row_values", |f: &mut Frame, index: INT| f.row_values(index))
        .register_fn("rows", |f: &mut Frame| f.all_rows())
        .register_indexer_get(|f: &mut Frame, name: ImmutableString| f.column(&name))
        .register_indexer_get(|f: &mut Frame, index: INT| f.row(index))
        .register_fn("select", |f: &mut Frame, names: Array| f.select(names))
        .register_fn(
            "filter",
            |ctx: NativeCallContext, f: &mut Frame, predicate: FnPtr| f.filter(&ctx, &predicate),
        )
        .register_fn("sort_by", |f: &mut Frame, name: &str| f.sort_by(name, false))
        .register_fn("sort_by", |f: &mut Frame, name: &str, descending: bool| {
            f.sort_by(name, descending)
        })
        .register_fn("sum", |f: &mut Frame, name: &str| f.sum(name))
        .register_fn("mean", |f: &mut Frame, name: &str| f.mean(name))
        .register_fn("min", |f: &mut Frame, name: &str| f.extreme(name, Ordering::Less))
        .register_fn("max", |f: &mut Frame, name: &str| f.extreme(name, Ordering::Greater))
        .register_fn("count", |f: &mut Frame, name: &str| f.count(name))
        .register_fn("unique", |f: &mut Frame, name: &str| f.unique(name))
        .register_fn("value_counts", |f: &mut Frame, name: &str| f.value_counts(name))
        .register_fn("to_string", |f: &mut Frame| f.display())
        .register_fn("to_debug", |f: &mut Frame| f.display());
}
