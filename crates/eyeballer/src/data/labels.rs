//! # Label Store
//!
//! The label table is a CSV with a `filename` column, one boolean column per
//! label and an `evaluation` column. Rows flagged `evaluation` form the
//! held-out [`EvaluationSet`]; the rest form the [`TrainingSet`].

use crate::errors::{EyeballError, Result};
use crate::rng::{SeedStream, StreamPurpose};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

/// One labelled screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    /// Image file name, relative to the image directory.
    pub filename: String,

    /// Held-out evaluation membership.
    pub evaluation: bool,

    /// Ground truth, aligned with the label set.
    pub labels: Vec<bool>,
}

impl LabelRecord {
    /// Ground truth as `0.0` / `1.0` values.
    pub fn targets(&self) -> Vec<f32> {
        self.labels
            .iter()
            .map(|&l| if l { 1.0 } else { 0.0 })
            .collect()
    }

    /// True if no label applies.
    pub fn is_none_of_the_above(&self) -> bool {
        self.labels.iter().all(|&l| !l)
    }
}

/// Records not flagged for evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSet {
    /// The records, in table order until shuffled.
    pub records: Vec<LabelRecord>,
}

/// Records flagged for evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSet {
    /// The records, in table order.
    pub records: Vec<LabelRecord>,
}

impl TrainingSet {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reorder deterministically with the label-shuffle stream.
    pub fn shuffle(
        &mut self,
        seeds: &SeedStream,
    ) {
        let mut rng = seeds.fork(StreamPurpose::LabelShuffle);
        self.records.shuffle(&mut rng);
    }

    /// Split off the validation subset.
    ///
    /// The first `floor(len * fraction)` records are validation; the rest
    /// are training. Returns `(train, validation)`.
    pub fn split_validation(
        self,
        fraction: f64,
    ) -> (Vec<LabelRecord>, Vec<LabelRecord>) {
        let n_valid = (self.records.len() as f64 * fraction).floor() as usize;
        let mut records = self.records;
        let train = records.split_off(n_valid);
        (train, records)
    }
}

impl EvaluationSet {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The parsed label table.
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
    label_set: Vec<String>,
    records: Vec<LabelRecord>,
}

impl LabelStore {
    /// Read the label table at `path`.
    ///
    /// # Errors
    ///
    /// * [`EyeballError::DataNotFound`] if the table is missing.
    /// * [`EyeballError::LabelTable`] if a required column is absent or a
    ///   cell is not a boolean.
    pub fn load<P: AsRef<Path>>(
        path: P,
        label_set: &[String],
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(EyeballError::DataNotFound { path });
        }
        let malformed = |message: String| EyeballError::LabelTable {
            path: path.clone(),
            message,
        };

        let mut reader = csv::Reader::from_path(&path).map_err(|e| malformed(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| malformed(e.to_string()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| malformed(format!("missing column '{name}'")))
        };

        let filename_col = column("filename")?;
        let evaluation_col = column("evaluation")?;
        let label_cols = label_set
            .iter()
            .map(|l| column(l.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row.map_err(|e| malformed(e.to_string()))?;
            // Header is line 1.
            let line = idx + 2;
            let cell = |col: usize| {
                row.get(col)
                    .map(str::trim)
                    .ok_or_else(|| malformed(format!("line {line}: missing cell {col}")))
            };
            let flag = |col: usize| -> Result<bool> {
                let value = cell(col)?;
                parse_bool(value).ok_or_else(|| {
                    malformed(format!(
                        "line {line}: column '{}' has non-boolean value '{value}'",
                        &headers[col]
                    ))
                })
            };

            let filename = cell(filename_col)?.to_string();
            if filename.is_empty() {
                return Err(malformed(format!("line {line}: empty filename")));
            }
            records.push(LabelRecord {
                filename,
                evaluation: flag(evaluation_col)?,
                labels: label_cols
                    .iter()
                    .map(|&c| flag(c))
                    .collect::<Result<Vec<_>>>()?,
            });
        }

        tracing::debug!(
            path = %path.display(),
            rows = records.len(),
            "loaded label table"
        );

        Ok(Self {
            path,
            label_set: label_set.to_vec(),
            records,
        })
    }

    /// The table location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The label set the table was read with.
    pub fn label_set(&self) -> &[String] {
        &self.label_set
    }

    /// All records, in table order.
    pub fn records(&self) -> &[LabelRecord] {
        &self.records
    }

    /// Partition into disjoint training and evaluation sets.
    pub fn partition(&self) -> (TrainingSet, EvaluationSet) {
        let (eval, train): (Vec<_>, Vec<_>) =
            self.records.iter().cloned().partition(|r| r.evaluation);
        (TrainingSet { records: train }, EvaluationSet { records: eval })
    }

    /// Reproduce the `(train, validation)` split of a training run.
    pub fn validation_split(
        &self,
        seeds: &SeedStream,
        fraction: f64,
    ) -> (Vec<LabelRecord>, Vec<LabelRecord>) {
        let (mut training, _) = self.partition();
        training.shuffle(seeds);
        training.split_validation(fraction)
    }
}

/// Parse a boolean cell as written by common CSV producers.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "True" | "true" | "TRUE" | "1" | "1.0" => Some(true),
        "False" | "false" | "FALSE" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_label_set;
    use indoc::indoc;

    const TABLE: &str = indoc! {"
        filename,custom404,login,webapp,oldlooking,evaluation
        a.png,False,True,True,False,False
        b.png,True,False,False,False,True
        c.png,0,0,1,1,0
        d.png,false,false,false,false,false
        e.png,False,False,False,True,True
        f.png,True,True,False,False,False
    "};

    fn write_table(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_and_partition() {
        let (_dir, path) = write_table(TABLE);
        let store = LabelStore::load(&path, &default_label_set()).unwrap();
        assert_eq!(store.records().len(), 6);

        let (train, eval) = store.partition();
        assert_eq!(train.len(), 4);
        assert_eq!(eval.len(), 2);
        assert!(train.records.iter().all(|r| !r.evaluation));
        assert!(eval.records.iter().all(|r| r.evaluation));

        let c = &train.records[1];
        assert_eq!(c.filename, "c.png");
        assert_eq!(c.labels, vec![false, false, true, true]);
        assert_eq!(c.targets(), vec![0.0, 0.0, 1.0, 1.0]);
        assert!(train.records[2].is_none_of_the_above());
    }

    #[test]
    fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let err = LabelStore::load(dir.path().join("labels.csv"), &default_label_set())
            .unwrap_err();
        assert!(matches!(err, EyeballError::DataNotFound { .. }));
    }

    #[test]
    fn test_missing_column() {
        let (_dir, path) = write_table(indoc! {"
            filename,custom404,login,webapp,evaluation
            a.png,False,True,True,False
        "});
        let err = LabelStore::load(&path, &default_label_set()).unwrap_err();
        assert!(err.to_string().contains("oldlooking"));
    }

    #[test]
    fn test_bad_cell() {
        let (_dir, path) = write_table(indoc! {"
            filename,custom404,login,webapp,oldlooking,evaluation
            a.png,False,maybe,True,False,False
        "});
        let err = LabelStore::load(&path, &default_label_set()).unwrap_err();
        assert!(matches!(err, EyeballError::LabelTable { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let (_dir, path) = write_table(TABLE);
        let store = LabelStore::load(&path, &default_label_set()).unwrap();

        let shuffled = |seed| {
            let (mut train, _) = store.partition();
            train.shuffle(&SeedStream::new(seed));
            train
                .records
                .into_iter()
                .map(|r| r.filename)
                .collect::<Vec<_>>()
        };
        assert_eq!(shuffled(3), shuffled(3));

        let mut sorted = shuffled(3);
        sorted.sort();
        assert_eq!(sorted, vec!["a.png", "c.png", "d.png", "f.png"]);
    }

    #[test]
    fn test_validation_split() {
        let (_dir, path) = write_table(TABLE);
        let store = LabelStore::load(&path, &default_label_set()).unwrap();
        let seeds = SeedStream::new(11);

        let (train, valid) = store.validation_split(&seeds, 0.5);
        assert_eq!(valid.len(), 2);
        assert_eq!(train.len(), 2);
        assert!(valid.iter().all(|v| !train.contains(v)));

        let (again_train, again_valid) = store.validation_split(&seeds, 0.5);
        assert_eq!(train, again_train);
        assert_eq!(valid, again_valid);

        let (train, valid) = store.validation_split(&seeds, 0.2);
        assert_eq!(valid.len(), 0);
        assert_eq!(train.len(), 4);
    }
}
