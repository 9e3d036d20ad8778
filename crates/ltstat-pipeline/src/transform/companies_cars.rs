//! Regitra vehicle park export
//!
//! Keeps the vehicle and owner columns, drops rows without a commercial
//! model name and leads with the owner's company code.

use crate::table::{RawTable, TransformedTable};
use crate::transform::TransformError;

pub const LEAD_COLUMN: &str = "KODAS";
pub const REQUIRED_COLUMN: &str = "KOMERCINIS_PAV";

pub const SELECTED_COLUMNS: &[&str] = &[
    "MARKE",
    "KOMERCINIS_PAV",
    "KATEGORIJA_KLASE",
    "NUOSAVA_MASE",
    "GALIA",
    "GALIA_ELEKTR",
    "DEGALAI",
    "CO2_KIEKIS",
    "CO2_KIEKIS__WLTP",
    "TERSALU_LYGIS",
    "GALIOS_MASES_SANT",
    "PIRM_REG_DATA",
    "PIRM_REG_DATA_LT",
    "KODAS",
    "PAVADINIMAS",
    "SAVIVALDYBE",
    "APSKRITIS",
];

pub fn transform(raw: RawTable) -> Result<TransformedTable, TransformError> {
    let table = raw
        .into_table()
        .select(SELECTED_COLUMNS)?
        .drop_nulls(REQUIRED_COLUMN)?
        .move_to_front(LEAD_COLUMN)?;

    Ok(TransformedTable::new(table))
}
