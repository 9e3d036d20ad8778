//! Built-in file mappings for the two published datasets

use super::{ColumnSchema, ColumnType, FileConfiguration};

/// Regitra vehicle park export, as named inside its archive
pub const COMPANIES_CARS_FILE: &str = "Atviri_JTP_parko_duomenys.csv";

/// Canonical staged name of the Sodra monthly salaries export
pub const EMPLOYEES_SALARIES_FILE: &str = "employees_salaries_raw.csv";

fn schema(columns: &[(&str, ColumnType)]) -> Vec<ColumnSchema> {
    columns
        .iter()
        .map(|(name, data_type)| ColumnSchema::new(*name, *data_type))
        .collect()
}

pub(crate) fn employees_salaries() -> FileConfiguration {
    use ColumnType::*;

    FileConfiguration {
        file_name: EMPLOYEES_SALARIES_FILE.to_string(),
        delimiter: ',',
        table_name: "employees_salaries".to_string(),
        table_schema: schema(&[
            ("kodas", Integer),
            ("pavadinimas", String),
            ("savivaldybe", String),
            ("veiklos_kodas", String),
            ("veiklos_pavadinimas", String),
            ("vidutinis_darbo_uzmokestis", Float),
            ("apdraustuju_skaicius", Integer),
            ("periodas", Date),
        ]),
    }
}

pub(crate) fn companies_cars() -> FileConfiguration {
    use ColumnType::*;

    FileConfiguration {
        file_name: COMPANIES_CARS_FILE.to_string(),
        delimiter: ',',
        table_name: "companies_cars".to_string(),
        table_schema: schema(&[
            ("KODAS", Integer),
            ("MARKE", String),
            ("KOMERCINIS_PAV", String),
            ("KATEGORIJA_KLASE", String),
            ("NUOSAVA_MASE", Integer),
            ("GALIA", Float),
            ("GALIA_ELEKTR", Float),
            ("DEGALAI", String),
            ("CO2_KIEKIS", Float),
            ("CO2_KIEKIS__WLTP", Float),
            ("TERSALU_LYGIS", String),
            ("GALIOS_MASES_SANT", Float),
            ("PIRM_REG_DATA", Date),
            ("PIRM_REG_DATA_LT", Date),
            ("PAVADINIMAS", String),
            ("SAVIVALDYBE", String),
            ("APSKRITIS", String),
        ]),
    }
}

pub(crate) fn builtin_configurations() -> Vec<FileConfiguration> {
    vec![employees_salaries(), companies_cars()]
}
