use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;

/// Id reserved for words without a vector. Its row is all zeros.
pub const OOV_ID: usize = 0;

/// Pre-trained word vectors, looked up by word id.
///
/// Row 0 is the out-of-vocabulary vector; every known word gets the row
/// index of its vector as its id.
#[derive(Debug, Clone)]
pub struct VectorTable {
    index: HashMap<String, usize>,
    vectors: Matrix,
}

impl VectorTable {
    /// Builds a table from `(word, vector)` pairs. Later duplicates are ignored.
    pub fn from_pairs<I>(dim: usize, pairs: I) -> NnResult<VectorTable>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        let mut index = HashMap::new();
        let mut rows = vec![vec![0.0; dim]];
        for (word, vector) in pairs {
            if vector.len() != dim {
                return Err(NnError::Dataset(format!(
                    "vector for '{}' has {} dimensions, expected {}",
                    word, vector.len(), dim
                )));
            }
            if index.contains_key(&word) {
                continue;
            }
            index.insert(word, rows.len());
            rows.push(vector);
        }
        Ok(VectorTable { index, vectors: Matrix::from_rows(rows, dim) })
    }

    /// Reads GloVe-style text vectors: one `word f1 ... fD` line per word.
    /// A leading word2vec `count dim` header line sets the width and is
    /// otherwise skipped. Words may contain spaces (`. . .` in the common
    /// crawl release): the last `D` fields are the vector, the rest the word.
    pub fn load_text<P: AsRef<Path>>(path: P) -> NnResult<VectorTable> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut pairs = Vec::new();
        let mut dim = None;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let fields: Vec<&str> = line.split(' ').filter(|f| !f.is_empty()).collect();
            if fields.is_empty() {
                continue;
            }
            if line_no == 0 && fields.len() == 2 && fields.iter().all(|f| f.parse::<usize>().is_ok()) {
                dim = fields[1].parse().ok();
                continue;
            }
            let d = *dim.get_or_insert_with(|| trailing_floats(&fields));
            let (word, values) = split_entry(&fields, d).map_err(|msg| {
                NnError::Dataset(format!("{}:{}: {}", path.display(), line_no + 1, msg))
            })?;
            pairs.push((word, values));
        }
        let dim = dim.ok_or_else(|| NnError::Dataset(format!("{}: no vectors found", path.display())))?;
        let table = VectorTable::from_pairs(dim, pairs)?;
        tracing::info!(path = %path.display(), words = table.len(), dim, "loaded word vectors");
        Ok(table)
    }

    /// Vector width.
    pub fn dim(&self) -> usize {
        self.vectors.cols
    }

    /// Number of known words.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Id of `word`, trying the exact form then the lower-cased form.
    pub fn word_id(&self, word: &str) -> usize {
        if let Some(&id) = self.index.get(word) {
            return id;
        }
        self.index.get(&word.to_lowercase()).copied().unwrap_or(OOV_ID)
    }

    /// Vector row for `id`; unknown ids map to the zero vector.
    pub fn vector(&self, id: usize) -> &[f64] {
        self.vectors.data.get(id).unwrap_or(&self.vectors.data[OOV_ID])
    }
}

/// Width of the vector on a line whose width is not known yet: the run of
/// numeric fields at the end, leaving at least one field for the word.
fn trailing_floats(fields: &[&str]) -> usize {
    let numeric = fields.iter().rev().take_while(|f| f.parse::<f64>().is_ok()).count();
    numeric.min(fields.len().saturating_sub(1))
}

/// Splits one line into its word and `dim` values.
fn split_entry(fields: &[&str], dim: usize) -> Result<(String, Vec<f64>), String> {
    if fields.len() < dim + 1 {
        return Err(format!("expected {} dimensions, got {}", dim, fields.len().saturating_sub(1)));
    }
    let (word, values) = fields.split_at(fields.len() - dim);
    // Extra numeric fields mean a wider vector, not a multi-word token.
    if word[1..].iter().any(|f| f.parse::<f64>().is_ok()) {
        return Err(format!("expected {} dimensions, got {}", dim, fields.len() - 1));
    }
    let values = values.iter()
        .map(|f| f.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| format!("bad vector value: {}", e))?;
    Ok((word.join(" "), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_glove_text_and_skips_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2 3").unwrap();
        writeln!(file, "cat 0.1 0.2 0.3").unwrap();
        writeln!(file, "dog 1 2 3").unwrap();
        writeln!(file, "cat 9 9 9").unwrap();
        let table = VectorTable::load_text(file.path()).unwrap();
        assert_eq!(table.dim(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(table.vector(table.word_id("cat")), &[0.1, 0.2, 0.3]);
        assert_eq!(table.word_id("Dog"), table.word_id("dog"));
        assert_eq!(table.word_id("emu"), OOV_ID);
        assert_eq!(table.vector(OOV_ID), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn inconsistent_dimensions_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 0.1 0.2").unwrap();
        writeln!(file, "dog 1 2 3").unwrap();
        assert!(matches!(VectorTable::load_text(file.path()), Err(NnError::Dataset(_))));
    }

    #[test]
    fn words_with_spaces_keep_the_trailing_vector() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 0.1 0.2 0.3").unwrap();
        writeln!(file, ". . . 0.4 0.5 0.6").unwrap();
        writeln!(file, "dog 1 2 3").unwrap();
        let table = VectorTable::load_text(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.vector(table.word_id(". . .")), &[0.4, 0.5, 0.6]);
        assert_eq!(table.vector(table.word_id("dog")), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn numeric_words_use_the_header_width() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2 2").unwrap();
        writeln!(file, "1990 0.5 0.25").unwrap();
        writeln!(file, "x 1 2").unwrap();
        let table = VectorTable::load_text(file.path()).unwrap();
        assert_eq!(table.dim(), 2);
        assert_eq!(table.vector(table.word_id("1990")), &[0.5, 0.25]);
    }
}
