//! The package-intelligence index: records live in their own sqlite file
//! (seeded by the bulk import tooling) and are held in memory with their
//! embeddings for nearest-neighbor lookup.

use std::path::Path;
use std::str::FromStr;

use floating_distance::Metric;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use crate::db::DbError;

use super::embedder::PackageEmbedder;
use super::types::{Ecosystem, PackageRecord, PackageStatus};

struct IndexedPackage {
    record: PackageRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct PackageMatch {
    pub record: PackageRecord,
    pub score: f32,
}

pub struct PackageIndex {
    records: Vec<IndexedPackage>,
    embedder: PackageEmbedder,
    similarity_floor: f32,
}

impl PackageIndex {
    pub fn empty(similarity_floor: f32) -> Self {
        Self {
            records: Vec::new(),
            embedder: PackageEmbedder::new(),
            similarity_floor,
        }
    }

    pub fn with_records(records: Vec<PackageRecord>, similarity_floor: f32) -> Self {
        let embedder = PackageEmbedder::new();
        let records = records
            .into_iter()
            .map(|record| IndexedPackage {
                embedding: embedder.embed(&record.name),
                record,
            })
            .collect();
        Self {
            records,
            embedder,
            similarity_floor,
        }
    }

    /// Loads the vector db file. A missing file is not an error, the
    /// gateway just runs with an empty index until the import has run.
    pub async fn load(path: &Path, similarity_floor: f32) -> Result<Self, DbError> {
        if !path.exists() {
            warn!(path = %path.display(), "package index file missing, lookups disabled");
            return Ok(Self::empty(similarity_floor));
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(path))
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let rows: Vec<(String, String, String, Option<String>)> =
            sqlx::query_as("SELECT ecosystem, name, status, advisory_url FROM packages")
                .fetch_all(&pool)
                .await?;
        pool.close().await;

        let mut records = Vec::with_capacity(rows.len());
        for (ecosystem, name, status, advisory_url) in rows {
            let Some(ecosystem) = Ecosystem::parse(&ecosystem) else {
                warn!(ecosystem = %ecosystem, name = %name, "skipping row with unknown ecosystem");
                continue;
            };
            let Some(status) = PackageStatus::parse(&status) else {
                warn!(status = %status, name = %name, "skipping row with unknown status");
                continue;
            };
            let mut record = PackageRecord::new(ecosystem, name, status);
            record.advisory_url = advisory_url;
            records.push(record);
        }
        info!(count = records.len(), "package index loaded");
        Ok(Self::with_records(records, similarity_floor))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn similarity_floor(&self) -> f32 {
        self.similarity_floor
    }

    /// Canonical name folding: pypi and crates treat `-`, `_` (and `.` on
    /// pypi) as the same separator.
    fn canonical(name: &str, ecosystem: Ecosystem) -> String {
        let folded = name.to_lowercase();
        match ecosystem {
            Ecosystem::Pypi => folded.replace(['_', '.'], "-"),
            Ecosystem::Crates => folded.replace('_', "-"),
            _ => folded,
        }
    }

    /// Exact (canonicalized) lookup, the path free-text token scanning uses.
    pub fn exact(&self, name: &str, ecosystem: Ecosystem) -> Option<&PackageRecord> {
        let folded = Self::canonical(name, ecosystem);
        self.records
            .iter()
            .find(|indexed| {
                indexed.record.ecosystem == ecosystem
                    && Self::canonical(&indexed.record.name, ecosystem) == folded
            })
            .map(|indexed| &indexed.record)
    }

    /// Nearest-neighbor lookup by cosine over the identifier embedding.
    /// Scores under the similarity floor come back as None ("unknown").
    pub fn lookup(&self, name: &str, ecosystem: Ecosystem) -> Option<PackageMatch> {
        if let Some(record) = self.exact(name, ecosystem) {
            return Some(PackageMatch {
                record: record.clone(),
                score: 1.0,
            });
        }
        let query = self.embedder.embed(name);
        let metric = Metric::Cosine;
        let mut best: Option<PackageMatch> = None;
        for indexed in &self.records {
            if indexed.record.ecosystem != ecosystem {
                continue;
            }
            let score = metric.measure::<f32>(&query, &indexed.embedding);
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(PackageMatch {
                    record: indexed.record.clone(),
                    score,
                });
            }
        }
        best.filter(|found| found.score >= self.similarity_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PackageIndex {
        PackageIndex::with_records(
            vec![
                PackageRecord::new(Ecosystem::Pypi, "invokehttp", PackageStatus::Malicious),
                PackageRecord::new(Ecosystem::Pypi, "archived-lib", PackageStatus::Archived),
                PackageRecord::new(Ecosystem::Npm, "left-pad", PackageStatus::Deprecated),
            ],
            0.85,
        )
    }

    #[test]
    fn exact_hit_scores_one() {
        let found = index().lookup("invokehttp", Ecosystem::Pypi).unwrap();
        assert_eq!(found.score, 1.0);
        assert_eq!(found.record.status, PackageStatus::Malicious);
    }

    #[test]
    fn exact_lookup_is_case_folded() {
        assert!(index().exact("InvokeHTTP", Ecosystem::Pypi).is_some());
    }

    #[test]
    fn ecosystem_scopes_the_search() {
        assert!(index().lookup("invokehttp", Ecosystem::Npm).is_none());
    }

    #[test]
    fn distant_names_fall_under_the_floor() {
        assert!(index().lookup("numpy", Ecosystem::Pypi).is_none());
    }

    #[tokio::test]
    async fn missing_index_file_yields_empty_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = PackageIndex::load(&dir.path().join("vectordb.db"), 0.85)
            .await
            .expect("load");
        assert!(index.is_empty());
    }
}
