//! Column values rendered as display text.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{ColumnData, FromSql};

use sqlsurge_core::Row;

/// Same layout as `CONVERT(varchar(23), ..., 121)`.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const NULL: &str = "NULL";

/// Convert a TDS row into a name/value row.
pub fn row_from_tds(row: tiberius::Row) -> Row {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let mut out = Row::new();
    for (name, data) in names.into_iter().zip(row) {
        out.push(name, render(&data));
    }
    out
}

fn show<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| NULL.to_string(), ToString::to_string)
}

fn temporal<'a, T>(data: &'a ColumnData<'static>, format: impl Fn(T) -> String) -> String
where
    T: FromSql<'a>,
{
    match T::from_sql(data) {
        Ok(Some(value)) => format(value),
        Ok(None) => NULL.to_string(),
        Err(_) => format!("{data:?}"),
    }
}

pub fn render(data: &ColumnData<'static>) -> String {
    match data {
        ColumnData::U8(v) => show(v),
        ColumnData::I16(v) => show(v),
        ColumnData::I32(v) => show(v),
        ColumnData::I64(v) => show(v),
        ColumnData::F32(v) => show(v),
        ColumnData::F64(v) => show(v),
        ColumnData::Bit(v) => show(v),
        ColumnData::Guid(v) => show(v),
        ColumnData::Numeric(v) => show(v),
        ColumnData::String(v) => v
            .as_deref()
            .map_or_else(|| NULL.to_string(), str::to_string),
        ColumnData::Binary(v) => match v {
            Some(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("0x{hex}")
            }
            None => NULL.to_string(),
        },
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal(data, |v: NaiveDateTime| v.format(DATETIME_FORMAT).to_string())
        }
        ColumnData::Date(_) => temporal(data, |v: NaiveDate| v.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => temporal(data, |v: NaiveTime| v.format("%H:%M:%S%.3f").to_string()),
        other => format!("{other:?}"),
    }
}
