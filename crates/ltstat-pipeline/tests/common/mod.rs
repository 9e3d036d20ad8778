//! Shared fixtures for integration tests: archive builders, source CSVs and
//! a pipeline wired to in-process stores.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

use ltstat_pipeline::config::ArchiveSourceConfig;
use ltstat_pipeline::fetch::{ArchiveSource, FetchError};
use ltstat_pipeline::registry::EMPLOYEES_SALARIES_FILE;
use ltstat_pipeline::staging::{MemoryObjectStore, RenameRule, Stager};
use ltstat_pipeline::warehouse::MemoryWarehouse;
use ltstat_pipeline::{LoadLocation, LoadOrchestrator, PipelineDriver, SchemaRegistry, TransformRegistry};

pub const SODRA_URL: &str = "https://atvira.sodra.lt/imones/downloads/2024/monthly-2024.csv.zip";
pub const REGITRA_URL: &str = "https://www.regitra.lt/atvduom/Atviri_JTP_parko_duomenys.zip";

pub const BUCKET: &str = "lithuania_statistics";
pub const STAGING_FOLDER: &str = "companies_cars";
pub const TEMP_FOLDER: &str = "temp";
pub const DATASET: &str = "lithuania_statistics";

pub const SODRA_HEADERS: &[&str] = &[
    "Draudėjo kodas (code)",
    "Juridinių asmenų registro kodas (jarCode)",
    "Pavadinimas (name)",
    "Savivaldybė, kurioje registruota(municipality)",
    "Ekonominės veiklos rūšies kodas(ecoActCode)",
    "Ekonominės veiklos rūšies pavadinimas(ecoActName)",
    "Mėnuo (month)",
    "Vidutinis darbo užmokestis (avgWage)",
    "Apdraustųjų skaičius (numInsured)",
    "Valstybinio socialinio draudimo įmoka (tax)",
];

pub const REGITRA_HEADERS: &[&str] = &[
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
    "SPALVA",
];

/// Build a zip holding `members` in order
pub fn zip_archive<B: AsRef<[u8]>>(members: &[(&str, B)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes.as_ref()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Comma-delimited CSV with a header row; fields are quoted as needed
pub fn csv_bytes(headers: &[&str], rows: &[Vec<String>]) -> Vec<u8> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.into_inner().unwrap()
}

/// One Sodra row per `(jarCode, month, avgWage)`
pub fn sodra_csv(rows: &[(&str, &str, &str)]) -> Vec<u8> {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|(code, month, wage)| {
            vec![
                "1001".to_string(),
                code.to_string(),
                format!("UAB Įmonė {code}"),
                "Vilniaus m. sav.".to_string(),
                "620100".to_string(),
                "Kompiuterių programavimo veikla".to_string(),
                month.to_string(),
                wage.to_string(),
                "12".to_string(),
                "1530.20".to_string(),
            ]
        })
        .collect();
    csv_bytes(SODRA_HEADERS, &rows)
}

/// One Regitra row per `(KODAS, KOMERCINIS_PAV)`; an empty model name is a null
pub fn regitra_csv(rows: &[(&str, &str)]) -> Vec<u8> {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|(code, model)| {
            vec![
                "TOYOTA".to_string(),
                model.to_string(),
                "M1".to_string(),
                "1420".to_string(),
                "90".to_string(),
                "".to_string(),
                "Benzinas".to_string(),
                "118".to_string(),
                "".to_string(),
                "EURO 6".to_string(),
                "0.06".to_string(),
                "2019-05-14".to_string(),
                "2019-05-20".to_string(),
                code.to_string(),
                "UAB Autoparkas".to_string(),
                "Kauno m. sav.".to_string(),
                "Kauno apskr.".to_string(),
                "Balta".to_string(),
            ]
        })
        .collect();
    csv_bytes(REGITRA_HEADERS, &rows)
}

/// Archive source answering from a fixed URL → response map
#[derive(Default)]
pub struct StaticArchiveSource {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
}

impl StaticArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.responses.lock().unwrap().insert(url.to_string(), Ok(bytes));
    }

    pub fn reject(&self, url: &str, status: u16) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Err(FetchError::HttpStatus {
                url: url.to_string(),
                status,
                reason: "Rejected".to_string(),
            }),
        );
    }
}

#[async_trait]
impl ArchiveSource for StaticArchiveSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Transport {
                    url: url.to_string(),
                    message: "no route to host".to_string(),
                })
            })
    }
}

pub fn location() -> LoadLocation {
    LoadLocation {
        bucket: BUCKET.to_string(),
        folder: STAGING_FOLDER.to_string(),
        temp_folder: TEMP_FOLDER.to_string(),
        dataset: DATASET.to_string(),
    }
}

pub fn orchestrator(store: Arc<MemoryObjectStore>, warehouse: MemoryWarehouse) -> LoadOrchestrator {
    LoadOrchestrator::new(
        Arc::new(SchemaRegistry::builtin()),
        Arc::new(TransformRegistry::builtin()),
        store,
        Arc::new(warehouse),
        location(),
    )
}

pub fn sources() -> Vec<ArchiveSourceConfig> {
    vec![
        ArchiveSourceConfig::new("sodra", SODRA_URL),
        ArchiveSourceConfig::new("regitra", REGITRA_URL),
    ]
}

/// Driver over in-process stores with the default rename rule
pub fn driver(
    fetcher: Arc<StaticArchiveSource>,
    store: Arc<MemoryObjectStore>,
    warehouse: MemoryWarehouse,
) -> PipelineDriver {
    let rules = vec![RenameRule::new("monthly", EMPLOYEES_SALARIES_FILE).unwrap()];
    PipelineDriver::new(
        sources(),
        STAGING_FOLDER,
        fetcher,
        Stager::new(store.clone(), BUCKET, rules),
        orchestrator(store, warehouse),
    )
}

/// Put raw bytes where the load phase expects a staged file
pub async fn stage_raw(store: &MemoryObjectStore, file_name: &str, bytes: Vec<u8>) {
    use ltstat_pipeline::staging::ObjectStore;

    store
        .put(BUCKET, &format!("{STAGING_FOLDER}/{file_name}"), bytes, "text/csv")
        .await
        .unwrap();
}
