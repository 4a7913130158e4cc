use geo::MultiPolygon;
use polars::prelude::*;
use serde::Serialize;
use serde_json::Value;

/// Join representation of a number. Integral values print without a
/// fractional part so `10180.0` and `10180` compare equal.
pub fn float_key(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

/// Categorical/join keys of one column, `None` where the cell is missing.
pub fn column_keys(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let column = frame.column(name)?;

    if column.dtype() == &DataType::String {
        return Ok(column
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.trim().to_string()))
            .collect());
    }

    if column.dtype().is_float() {
        let floats = column.cast(&DataType::Float64)?;
        let keys = floats.f64()?.into_iter().map(|v| v.map(float_key)).collect();
        return Ok(keys);
    }

    let text = column.cast(&DataType::String)?;
    let keys = text.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
    Ok(keys)
}

/// Numeric view of one column. Unparseable text and NaN come back as `None`.
pub fn float_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let floats = frame.column(name)?.cast(&DataType::Float64)?;
    let values = floats
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();
    Ok(values)
}

/// Row-major JSON rendering of a frame for the raw-data panels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Records {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Records {
    pub fn from_frame(frame: &DataFrame) -> PolarsResult<Self> {
        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows: Vec<Vec<Value>> = (0..frame.height())
            .map(|_| Vec::with_capacity(columns.len()))
            .collect();
        for name in &columns {
            for (row, value) in rows.iter_mut().zip(json_values(frame, name)?) {
                row.push(value);
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates one column's values. Yields nothing for an unknown column.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Value> + 'a {
        let idx = self.columns.iter().position(|c| c == name);
        self.rows.iter().filter_map(move |row| idx.map(|i| &row[i]))
    }
}

fn json_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Value>> {
    let column = frame.column(name)?;
    let dtype = column.dtype();

    if dtype.is_integer() {
        let ints = column.cast(&DataType::Int64)?;
        let values = ints
            .i64()?
            .into_iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect();
        return Ok(values);
    }

    if dtype.is_float() {
        let floats = column.cast(&DataType::Float64)?;
        let values = floats
            .f64()?
            .into_iter()
            .map(|v| {
                v.and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
            .collect();
        return Ok(values);
    }

    if dtype == &DataType::Boolean {
        return Ok(column
            .bool()?
            .into_iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect());
    }

    let text = column.cast(&DataType::String)?;
    let values = text
        .str()?
        .into_iter()
        .map(|v| v.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null))
        .collect();
    Ok(values)
}

/// One market polygon from the boundary collection.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
}
