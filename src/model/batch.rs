use std::ops::Range;

use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;

/// A value flowing between models.
///
/// The text-pair pipeline changes representation several times on its way
/// from raw text to class scores:
///
/// ```text
/// Pairs{B} -> Docs{2B} -> IdSeqs{2B} -> RaggedIds{T, 2B} -> Ragged{T x W, 2B} -> Floats{2B x W}
/// ```
///
/// Gradients travel backwards as `Floats` or `Ragged`.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Tokenized texts.
    Docs(Vec<Vec<String>>),
    /// Pairs of tokenized texts.
    Pairs(Vec<(Vec<String>, Vec<String>)>),
    /// Word ids, one list per text.
    IdSeqs(Vec<Vec<usize>>),
    /// Flat word ids.
    Ids(Vec<usize>),
    /// Flat word ids plus the number of ids belonging to each text.
    RaggedIds { ids: Vec<usize>, lengths: Vec<usize> },
    /// One dense row per item.
    Floats(Matrix),
    /// Dense rows grouped into consecutive sequences.
    Ragged { data: Matrix, lengths: Vec<usize> },
}

impl Batch {
    pub fn kind(&self) -> &'static str {
        match self {
            Batch::Docs(_) => "docs",
            Batch::Pairs(_) => "pairs",
            Batch::IdSeqs(_) => "id sequences",
            Batch::Ids(_) => "ids",
            Batch::RaggedIds { .. } => "ragged ids",
            Batch::Floats(_) => "floats",
            Batch::Ragged { .. } => "ragged floats",
        }
    }

    /// Number of items: texts, pairs, rows or sequences.
    pub fn len(&self) -> usize {
        match self {
            Batch::Docs(docs) => docs.len(),
            Batch::Pairs(pairs) => pairs.len(),
            Batch::IdSeqs(seqs) => seqs.len(),
            Batch::Ids(ids) => ids.len(),
            Batch::RaggedIds { lengths, .. } => lengths.len(),
            Batch::Floats(m) => m.rows,
            Batch::Ragged { lengths, .. } => lengths.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the items in `range`. Ragged values keep whole sequences.
    pub fn slice(&self, range: Range<usize>) -> Batch {
        match self {
            Batch::Docs(docs) => Batch::Docs(docs[range].to_vec()),
            Batch::Pairs(pairs) => Batch::Pairs(pairs[range].to_vec()),
            Batch::IdSeqs(seqs) => Batch::IdSeqs(seqs[range].to_vec()),
            Batch::Ids(ids) => Batch::Ids(ids[range].to_vec()),
            Batch::RaggedIds { ids, lengths } => {
                let rows = ragged_rows(lengths, &range);
                Batch::RaggedIds { ids: ids[rows].to_vec(), lengths: lengths[range].to_vec() }
            }
            Batch::Floats(m) => Batch::Floats(m.slice_rows(range)),
            Batch::Ragged { data, lengths } => {
                let rows = ragged_rows(lengths, &range);
                Batch::Ragged { data: data.slice_rows(rows), lengths: lengths[range].to_vec() }
            }
        }
    }

    /// Picks items by index, in the given order.
    pub fn take(&self, indices: &[usize]) -> Batch {
        match self {
            Batch::Docs(docs) => Batch::Docs(indices.iter().map(|&i| docs[i].clone()).collect()),
            Batch::Pairs(pairs) => Batch::Pairs(indices.iter().map(|&i| pairs[i].clone()).collect()),
            Batch::IdSeqs(seqs) => Batch::IdSeqs(indices.iter().map(|&i| seqs[i].clone()).collect()),
            Batch::Ids(ids) => Batch::Ids(indices.iter().map(|&i| ids[i]).collect()),
            Batch::Floats(m) => Batch::Floats(take_rows(m, indices)),
            Batch::RaggedIds { .. } | Batch::Ragged { .. } => {
                let parts: Vec<Batch> = indices.iter().map(|&i| self.slice(i..i + 1)).collect();
                concat_ragged(parts)
            }
        }
    }

    pub fn as_floats(&self, layer: &str) -> NnResult<&Matrix> {
        match self {
            Batch::Floats(m) => Ok(m),
            other => Err(NnError::input_kind(layer, "floats", other.kind())),
        }
    }

    pub fn into_floats(self, layer: &str) -> NnResult<Matrix> {
        match self {
            Batch::Floats(m) => Ok(m),
            other => Err(NnError::input_kind(layer, "floats", other.kind())),
        }
    }

    /// Sums two gradients of the same kind and shape.
    pub fn add(self, other: Batch) -> NnResult<Batch> {
        match (self, other) {
            (Batch::Floats(mut a), Batch::Floats(b)) => {
                if a.shape() != b.shape() {
                    return Err(NnError::shape("gradient sum", a.shape(), b.shape()));
                }
                a.add_assign(&b);
                Ok(Batch::Floats(a))
            }
            (Batch::Ragged { data: mut a, lengths }, Batch::Ragged { data: b, lengths: other_lengths }) => {
                if a.shape() != b.shape() || lengths != other_lengths {
                    return Err(NnError::shape("gradient sum", a.shape(), b.shape()));
                }
                a.add_assign(&b);
                Ok(Batch::Ragged { data: a, lengths })
            }
            (a, b) => Err(NnError::input_kind("gradient sum", a.kind(), b.kind())),
        }
    }
}

fn ragged_rows(lengths: &[usize], items: &Range<usize>) -> Range<usize> {
    let start: usize = lengths[..items.start].iter().sum();
    let len: usize = lengths[items.clone()].iter().sum();
    start..start + len
}

fn take_rows(m: &Matrix, indices: &[usize]) -> Matrix {
    Matrix::from_rows(indices.iter().map(|&i| m.data[i].clone()).collect(), m.cols)
}

fn concat_ragged(parts: Vec<Batch>) -> Batch {
    let mut all_ids = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut all_lengths = Vec::new();
    let mut cols = 0;
    let mut dense = false;
    for part in parts {
        match part {
            Batch::RaggedIds { ids, lengths } => {
                all_ids.extend(ids);
                all_lengths.extend(lengths);
            }
            Batch::Ragged { data, lengths } => {
                dense = true;
                cols = data.cols;
                rows.extend(data.data);
                all_lengths.extend(lengths);
            }
            _ => unreachable!("concat_ragged only receives ragged slices"),
        }
    }
    if dense {
        Batch::Ragged { data: Matrix::from_rows(rows, cols), lengths: all_lengths }
    } else {
        Batch::RaggedIds { ids: all_ids, lengths: all_lengths }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_slice_keeps_whole_sequences() {
        let data = Matrix::from_data(vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]]);
        let batch = Batch::Ragged { data, lengths: vec![2, 0, 3] };
        match batch.slice(1..3) {
            Batch::Ragged { data, lengths } => {
                assert_eq!(lengths, vec![0, 3]);
                assert_eq!(data.data, vec![vec![3.0], vec![4.0], vec![5.0]]);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn take_reorders_ragged_ids() {
        let batch = Batch::RaggedIds { ids: vec![1, 2, 3], lengths: vec![1, 2] };
        assert_eq!(
            batch.take(&[1, 0]),
            Batch::RaggedIds { ids: vec![2, 3, 1], lengths: vec![2, 1] }
        );
    }

    #[test]
    fn adding_mismatched_gradients_fails() {
        let a = Batch::Floats(Matrix::zeros(2, 2));
        let b = Batch::Floats(Matrix::zeros(2, 3));
        assert!(a.add(b).is_err());
        let c = Batch::Ids(vec![1]);
        assert!(Batch::Floats(Matrix::zeros(1, 1)).add(c).is_err());
    }
}
