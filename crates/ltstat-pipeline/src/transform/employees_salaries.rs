//! Sodra monthly salaries export
//!
//! The source headers are bilingual (`Lithuanian (english)`). The month is
//! encoded as `YYYYMM` and becomes a `periodas` date on the first day of
//! that month; the remaining columns get ASCII snake-case names.

use chrono::NaiveDate;

use crate::table::{RawTable, TransformedTable, Value};
use crate::transform::{is_ascii_snake_case, TransformError};

pub const MONTH_COLUMN: &str = "Mėnuo (month)";
pub const PERIOD_COLUMN: &str = "periodas";

pub const SELECTED_COLUMNS: &[&str] = &[
    "Juridinių asmenų registro kodas (jarCode)",
    "Pavadinimas (name)",
    "Savivaldybė, kurioje registruota(municipality)",
    "Ekonominės veiklos rūšies kodas(ecoActCode)",
    "Ekonominės veiklos rūšies pavadinimas(ecoActName)",
    MONTH_COLUMN,
    "Vidutinis darbo užmokestis (avgWage)",
    "Apdraustųjų skaičius (numInsured)",
];

pub const RENAMES: &[(&str, &str)] = &[
    ("Juridinių asmenų registro kodas (jarCode)", "kodas"),
    ("Pavadinimas (name)", "pavadinimas"),
    ("Savivaldybė, kurioje registruota(municipality)", "savivaldybe"),
    ("Ekonominės veiklos rūšies kodas(ecoActCode)", "veiklos_kodas"),
    ("Ekonominės veiklos rūšies pavadinimas(ecoActName)", "veiklos_pavadinimas"),
    ("Vidutinis darbo užmokestis (avgWage)", "vidutinis_darbo_uzmokestis"),
    ("Apdraustųjų skaičius (numInsured)", "apdraustuju_skaicius"),
];

pub fn transform(raw: RawTable) -> Result<TransformedTable, TransformError> {
    let table = raw
        .into_table()
        .select(SELECTED_COLUMNS)?
        .derive_column(MONTH_COLUMN, PERIOD_COLUMN, |row, value| {
            month_to_period(value).map_err(|reason| TransformError::InvalidValue {
                column: MONTH_COLUMN.to_string(),
                row,
                value: value.to_string(),
                reason,
            })
        })?
        .drop_column(MONTH_COLUMN)?
        .rename(RENAMES)?;

    if let Some(bad) = table.columns().iter().find(|c| !is_ascii_snake_case(c)) {
        return Err(TransformError::InvalidColumnName(bad.clone()));
    }

    Ok(TransformedTable::new(table))
}

fn month_to_period(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Text(s) => parse_year_month(s).map(Value::Date),
        other => Err(format!("expected YYYYMM text, got {other:?}")),
    }
}

/// `"202301"` → 2023-01-01. A trailing `.0` left by float exports is accepted.
pub fn parse_year_month(value: &str) -> Result<NaiveDate, String> {
    let trimmed = value.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("expected YYYYMM".to_string());
    }

    let (year, month) = digits.split_at(4);
    let year: i32 = year.parse().map_err(|_| "invalid year".to_string())?;
    let month: u32 = month.parse().map_err(|_| "invalid month".to_string())?;

    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| format!("month {month} out of range"))
}
