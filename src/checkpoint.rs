//! Durable checkpoint table: the filtered input plus one result column.
//!
//! The table on disk is the only record of what is left to do. A row whose
//! result is empty or carries a failure marker is pending; a row holding
//! anything else is done and is never overwritten by a merge. The whole table
//! is rewritten after every batch through a temp file and a rename.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::outcome::{Failure, FailureKind, Outcome, needs_processing};
use crate::workload::Workload;

/// One checkpoint row, aligned with [`CheckpointTable::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub fields: Vec<String>,
    pub result: Option<String>,
}

impl CheckpointRow {
    pub fn is_pending(&self) -> bool {
        needs_processing(self.result.as_deref())
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some() && !self.is_pending()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.result.as_deref().and_then(Failure::parse_marker)
    }
}

/// Aggregate counts over a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub missing: usize,
}

impl CheckpointStats {
    pub fn errors_or_missing(&self) -> usize {
        self.total - self.successes
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTable {
    pub columns: Vec<String>,
    pub result_column: String,
    pub rows: Vec<CheckpointRow>,
}

impl CheckpointTable {
    /// A fresh table with one empty-result row per work item.
    pub fn from_workload(workload: &Workload, result_column: &str) -> Self {
        // A pre-existing column of the same name is superseded by the result column.
        let keep: Vec<usize> = workload
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| *c != result_column)
            .map(|(i, _)| i)
            .collect();

        let columns = keep.iter().map(|&i| workload.columns[i].clone()).collect();
        let rows = workload
            .records
            .iter()
            .map(|record| CheckpointRow {
                fields: keep.iter().map(|&i| record[i].clone()).collect(),
                result: None,
            })
            .collect();

        Self {
            columns,
            result_column: result_column.to_string(),
            rows,
        }
    }

    /// Reads an existing checkpoint. A missing result column is added as all-empty.
    pub fn open(path: &Path, result_column: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let result_idx = headers.iter().position(|h| h == result_column);

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != result_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let fields = record
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != result_idx)
                .map(|(_, v)| v.to_string())
                .collect();
            let result = result_idx
                .and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            rows.push(CheckpointRow { fields, result });
        }

        if result_idx.is_none() {
            debug!(column = result_column, "result column missing, added as empty");
        }

        Ok(Self {
            columns,
            result_column: result_column.to_string(),
            rows,
        })
    }

    /// Resumes from `path` if it exists, otherwise seeds a table from `workload`.
    ///
    /// Returns the table and whether it was resumed. A resumed table must have
    /// exactly one row per filtered work item.
    pub fn load(path: &Path, result_column: &str, workload: &Workload) -> Result<(Self, bool)> {
        if !path.exists() {
            return Ok((Self::from_workload(workload, result_column), false));
        }

        let table = Self::open(path, result_column)?;
        if table.rows.len() != workload.len() {
            return Err(HarnessError::CheckpointMismatch {
                path: path.to_path_buf(),
                expected: workload.len(),
                found: table.rows.len(),
            });
        }
        Ok((table, true))
    }

    /// Ids whose result is empty or a failure marker, in row order.
    pub fn pending_work(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_pending())
            .map(|(id, _)| id)
            .collect()
    }

    /// Writes outcomes into their rows. Returns how many rows changed.
    ///
    /// Rows already holding a success are left untouched.
    pub fn merge(&mut self, outcomes: &[Outcome]) -> usize {
        let mut applied = 0;
        for outcome in outcomes {
            let Some(row) = self.rows.get_mut(outcome.id) else {
                warn!(id = outcome.id, "outcome for unknown row dropped");
                continue;
            };
            if row.is_success() {
                warn!(id = outcome.id, "row already succeeded, outcome ignored");
                continue;
            }
            row.result = Some(outcome.to_cell());
            applied += 1;
        }
        applied
    }

    pub fn stats(&self) -> CheckpointStats {
        let mut stats = CheckpointStats {
            total: self.rows.len(),
            ..CheckpointStats::default()
        };
        for row in &self.rows {
            match &row.result {
                None => stats.missing += 1,
                Some(_) if row.is_success() => stats.successes += 1,
                Some(_) => stats.failures += 1,
            }
        }
        stats
    }

    /// Failure counts per kind, in a fixed order, skipping kinds with no rows.
    pub fn failure_breakdown(&self) -> Vec<(FailureKind, usize)> {
        let kinds = [
            FailureKind::Timeout,
            FailureKind::RequestError,
            FailureKind::EmptyContent,
            FailureKind::UnknownError,
        ];
        let failures: Vec<FailureKind> =
            self.rows.iter().filter_map(|r| r.failure()).map(|f| f.kind).collect();
        kinds
            .into_iter()
            .map(|k| (k, failures.iter().filter(|&&f| f == k).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// Rewrites the checkpoint at `path`.
    ///
    /// The table goes to a hidden sibling file first, is synced, then renamed
    /// over the target, so readers see either the old or the new snapshot.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let tmp = temp_sibling(path);
        if let Err(e) = self.write_to(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), rows = self.rows.len(), "checkpoint persisted");
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        writer.write_record(
            self.columns
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(self.result_column.as_str())),
        )?;
        for row in &self.rows {
            writer.write_record(
                row.fields
                    .iter()
                    .map(String::as_str)
                    .chain(std::iter::once(row.result.as_deref().unwrap_or(""))),
            )?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("checkpoint.csv");
    path.with_file_name(format!(".{name}.tmp.{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Failure, FailureKind};
    use crate::workload::WorkItem;
    use tempfile::TempDir;

    fn workload(n: usize) -> Workload {
        Workload {
            items: (0..n)
                .map(|id| WorkItem {
                    id,
                    prompt: format!("prompt {id}"),
                    weight: 100,
                    max_output_tokens: 1000,
                })
                .collect(),
            columns: vec!["question".into(), "token_count".into()],
            records: (0..n).map(|i| vec![format!("q{i}"), "100".into()]).collect(),
            total_rows: n,
            filtered_out: 0,
        }
    }

    fn table_with(results: &[Option<&str>]) -> CheckpointTable {
        let mut table = CheckpointTable::from_workload(&workload(results.len()), "output");
        for (row, r) in table.rows.iter_mut().zip(results) {
            row.result = r.map(str::to_string);
        }
        table
    }

    #[test]
    fn fresh_table_is_all_pending() {
        let table = CheckpointTable::from_workload(&workload(3), "output");
        assert_eq!(table.columns, vec!["question", "token_count"]);
        assert_eq!(table.pending_work(), vec![0, 1, 2]);
    }

    #[test]
    fn pending_is_null_or_failure_marker() {
        let table = table_with(&[
            Some("a"),
            Some("b"),
            Some("c"),
            Some("ERROR_TIMEOUT: Request exceeded 500s"),
            None,
        ]);
        assert_eq!(table.pending_work(), vec![3, 4]);
    }

    #[test]
    fn merge_overwrites_failures_but_not_successes() {
        let mut table = table_with(&[Some("done"), Some("ERROR_REQUEST: 500"), None]);
        let outcomes = vec![
            Outcome::success(0, "should not land"),
            Outcome::success(1, "recovered"),
            Outcome::failure(2, Failure::new(FailureKind::EmptyContent, "")),
            Outcome::success(99, "stray"),
        ];

        let applied = table.merge(&outcomes);
        assert_eq!(applied, 2);
        assert_eq!(table.rows[0].result.as_deref(), Some("done"));
        assert_eq!(table.rows[1].result.as_deref(), Some("recovered"));
        assert_eq!(table.rows[2].result.as_deref(), Some("ERROR_NO_CONTENT"));
        assert_eq!(table.pending_work(), vec![2]);
    }

    #[test]
    fn stats_and_breakdown() {
        let table = table_with(&[
            Some("ok"),
            Some("ERROR_TIMEOUT: slow"),
            Some("ERROR_TIMEOUT: slower"),
            Some("ERROR_UNKNOWN: boom"),
            None,
        ]);
        let stats = table.stats();
        assert_eq!(
            stats,
            CheckpointStats {
                total: 5,
                successes: 1,
                failures: 3,
                missing: 1,
            }
        );
        assert_eq!(stats.errors_or_missing(), 4);
        assert_eq!(
            table.failure_breakdown(),
            vec![(FailureKind::Timeout, 2), (FailureKind::UnknownError, 1)]
        );
    }

    #[test]
    fn persist_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let table = table_with(&[Some("Paris, France"), Some("ERROR_NO_CONTENT"), None]);

        table.persist(&path).unwrap();
        let (loaded, resumed) = CheckpointTable::load(&path, "output", &workload(3)).unwrap();

        assert!(resumed);
        assert_eq!(loaded, table);
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn persisted_header_ends_with_result_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        table_with(&[Some("x")]).persist(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().next(), Some("question,token_count,output"));
    }

    #[test]
    fn load_adds_missing_result_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        fs::write(&path, "question,token_count\nq0,100\nq1,100\n").unwrap();

        let (table, resumed) = CheckpointTable::load(&path, "judge", &workload(2)).unwrap();
        assert!(resumed);
        assert_eq!(table.result_column, "judge");
        assert_eq!(table.pending_work(), vec![0, 1]);
    }

    #[test]
    fn load_without_file_seeds_from_workload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.csv");
        let (table, resumed) = CheckpointTable::load(&path, "output", &workload(4)).unwrap();
        assert!(!resumed);
        assert_eq!(table.rows.len(), 4);
    }

    #[test]
    fn load_rejects_row_count_mismatch() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        table_with(&[None, None]).persist(&path).unwrap();

        let err = CheckpointTable::load(&path, "output", &workload(3)).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::CheckpointMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn multiline_results_survive_persistence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let table = table_with(&[Some("line one\nline \"two\", quoted")]);
        table.persist(&path).unwrap();
        let reopened = CheckpointTable::open(&path, "output").unwrap();
        assert_eq!(reopened.rows[0].result, table.rows[0].result);
    }
}
