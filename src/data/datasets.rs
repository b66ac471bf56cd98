use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use crate::data::tokenizer::tokenize;
use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;

pub const QUORA_FILE: &str = "quora_duplicate_questions.tsv";
pub const SNLI_TRAIN_FILE: &str = "snli_1.0_train.jsonl";
pub const SNLI_DEV_FILE: &str = "snli_1.0_dev.jsonl";

/// One labelled text pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub text1: String,
    pub text2: String,
    pub label: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Quora duplicate questions: are two questions asking the same thing?
    Quora,
    /// Stanford NLI: does the premise entail, contradict or say nothing
    /// about the hypothesis?
    Snli,
}

impl DatasetKind {
    /// Class names in label-index order.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            DatasetKind::Quora => &["different", "duplicate"],
            DatasetKind::Snli => &["entailment", "neutral", "contradiction"],
        }
    }

    pub fn nr_class(self) -> usize {
        self.labels().len()
    }

    /// Reads the train and dev portions from the dataset's files in `data_dir`.
    /// Quora ships as one file, so a seeded `dev_fraction` of it is held out.
    pub fn load(self, data_dir: &Path, dev_fraction: f64, seed: u64) -> NnResult<(Vec<Example>, Vec<Example>)> {
        match self {
            DatasetKind::Quora => {
                let rows = read_quora(open(&data_dir.join(QUORA_FILE))?)?;
                Ok(split_dev(rows, dev_fraction, seed))
            }
            DatasetKind::Snli => {
                let train = read_snli(open(&data_dir.join(SNLI_TRAIN_FILE))?)?;
                let dev = read_snli(open(&data_dir.join(SNLI_DEV_FILE))?)?;
                Ok((train, dev))
            }
        }
    }
}

impl FromStr for DatasetKind {
    type Err = NnError;

    fn from_str(s: &str) -> NnResult<Self> {
        match s {
            "quora" => Ok(DatasetKind::Quora),
            "snli" => Ok(DatasetKind::Snli),
            other => Err(NnError::Dataset(format!("unknown dataset: {}", other))),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatasetKind::Quora => "quora",
            DatasetKind::Snli => "snli",
        })
    }
}

fn open(path: &Path) -> NnResult<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| NnError::Dataset(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

/// Parses the Quora TSV dump:
/// `id qid1 qid2 question1 question2 is_duplicate`, with a header row.
pub fn read_quora<R: BufRead>(reader: R) -> NnResult<Vec<Example>> {
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line_no == 0 && line.starts_with("id\t") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 6 {
            tracing::debug!(line = line_no + 1, "skipping quora row with {} fields", fields.len());
            continue;
        }
        let label = match fields[5].trim() {
            "0" => 0,
            "1" => 1,
            other => {
                tracing::debug!(line = line_no + 1, label = other, "skipping quora row with bad label");
                continue;
            }
        };
        rows.push(Example { text1: fields[3].to_string(), text2: fields[4].to_string(), label });
    }
    Ok(rows)
}

#[derive(Deserialize)]
struct SnliRecord {
    sentence1: String,
    sentence2: String,
    gold_label: String,
}

/// Parses SNLI JSON lines. Pairs without a gold label (`-`) are skipped.
pub fn read_snli<R: BufRead>(reader: R) -> NnResult<Vec<Example>> {
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SnliRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(line = line_no + 1, error = %e, "skipping malformed snli row");
                continue;
            }
        };
        let label = match DatasetKind::Snli.labels().iter().position(|l| *l == record.gold_label) {
            Some(label) => label,
            None => continue,
        };
        rows.push(Example { text1: record.sentence1, text2: record.sentence2, label });
    }
    Ok(rows)
}

/// Shuffles with a fixed seed and holds out `dev_fraction` of the rows.
pub fn split_dev(mut rows: Vec<Example>, dev_fraction: f64, seed: u64) -> (Vec<Example>, Vec<Example>) {
    rows.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_dev = ((rows.len() as f64) * dev_fraction.clamp(0.0, 1.0)).round() as usize;
    let train = rows.split_off(n_dev.min(rows.len()));
    (train, rows)
}

/// One-hot rows: `labels[i]` becomes row `i` with a single 1.
pub fn to_categorical(labels: &[usize], nr_class: usize) -> Matrix {
    let mut y = Matrix::zeros(labels.len(), nr_class);
    for (row, &label) in y.data.iter_mut().zip(labels) {
        if label < nr_class {
            row[label] = 1.0;
        }
    }
    y
}

/// Tokenizes both texts of every example and one-hot encodes the labels.
pub fn preprocess(examples: &[Example], nr_class: usize) -> (Batch, Matrix) {
    let pairs = examples.iter()
        .map(|ex| (tokenize(&ex.text1), tokenize(&ex.text2)))
        .collect();
    let labels: Vec<usize> = examples.iter().map(|ex| ex.label).collect();
    (Batch::Pairs(pairs), to_categorical(&labels, nr_class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quora_rows_are_parsed_and_bad_ones_skipped() {
        let tsv = "id\tqid1\tqid2\tquestion1\tquestion2\tis_duplicate\n\
                   0\t1\t2\tHow do I learn Rust?\tWhat is the best way to learn Rust?\t1\n\
                   1\t3\t4\tbroken row\n\
                   2\t5\t6\tWhat is 2+2?\tWho won the cup?\t0\n\
                   3\t7\t8\ta\tb\tmaybe\n";
        let rows = read_quora(tsv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, 1);
        assert_eq!(rows[1].text2, "Who won the cup?");
    }

    #[test]
    fn snli_skips_pairs_without_gold_label() {
        let jsonl = r#"{"sentence1": "A man sleeps.", "sentence2": "A person rests.", "gold_label": "entailment"}
{"sentence1": "A dog runs.", "sentence2": "A cat sits.", "gold_label": "-"}
not json
{"sentence1": "Kids play.", "sentence2": "Nobody plays.", "gold_label": "contradiction"}
"#;
        let rows = read_snli(jsonl.as_bytes()).unwrap();
        assert_eq!(rows.iter().map(|r| r.label).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn dev_split_is_seeded() {
        let rows: Vec<Example> = (0..10)
            .map(|i| Example { text1: i.to_string(), text2: String::new(), label: i % 2 })
            .collect();
        let (train_a, dev_a) = split_dev(rows.clone(), 0.2, 7);
        let (train_b, dev_b) = split_dev(rows, 0.2, 7);
        assert_eq!(dev_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        assert_eq!(dev_a, dev_b);
        assert_eq!(train_a, train_b);
    }

    #[test]
    fn categorical_is_one_hot() {
        let y = to_categorical(&[1, 0, 2], 3);
        assert_eq!(y.data, vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]]);
    }

    #[test]
    fn unknown_dataset_name_is_rejected() {
        assert!("imdb".parse::<DatasetKind>().is_err());
        assert_eq!("snli".parse::<DatasetKind>().unwrap().nr_class(), 3);
    }
}
