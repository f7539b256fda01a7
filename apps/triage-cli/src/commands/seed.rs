use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use triage_kernel::{Kernel, KnowledgeUpsert};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub imported: usize,
    pub skipped: usize,
}

pub fn seed_file(kernel: &Kernel, service: &str, path: &Path) -> Result<SeedReport> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    seed_from_reader(kernel, service, file, &label)
}

/// Upsert rows of `key phrase, english answer, hindi answer` under `service`.
///
/// The first row is a header. Rows without a key phrase are skipped.
pub fn seed_from_reader<R: Read>(
    kernel: &Kernel,
    service: &str,
    reader: R,
    source_label: &str,
) -> Result<SeedReport> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut report = SeedReport::default();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read record {}", idx + 1))?;
        // source line, counting the header and any blank lines the reader skipped
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(idx as u64 + 2);
        let key = record.get(0).unwrap_or("");
        if key.is_empty() {
            report.skipped += 1;
            continue;
        }
        let mut metadata = serde_json::Map::new();
        metadata.insert("source_file".into(), json!(source_label));
        metadata.insert("row".into(), json!(line));
        let entry = KnowledgeUpsert {
            service: service.to_string(),
            key_phrase: key.to_string(),
            answer_primary: record.get(1).unwrap_or("").to_string(),
            answer_secondary: record
                .get(2)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            metadata,
            created_by_automation: false,
        };
        let id = kernel
            .upsert_knowledge(&entry)
            .with_context(|| format!("upsert line {}", line))?;
        debug!(id, key, "knowledge entry upserted");
        report.imported += 1;
    }
    info!(
        service,
        imported = report.imported,
        skipped = report.skipped,
        "knowledge import finished"
    );
    Ok(report)
}
