use std::ops::{BitOr, Shr};

use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

// ---------------------------------------------------------------------------
// chain
// ---------------------------------------------------------------------------

/// Feed-forward composition: `chain(f, g)(x) == g(f(x))`.
pub struct Chain {
    id: usize,
    layers: Vec<Box<dyn Model>>,
}

impl Chain {
    pub fn new(layers: Vec<Box<dyn Model>>) -> Chain {
        Chain { id: next_model_id(), layers }
    }
}

impl Model for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        self.layers.first().and_then(|l| l.nr_in())
    }

    fn nr_out(&self) -> Option<usize> {
        self.layers.last().and_then(|l| l.nr_out())
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        &self.layers
    }

    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = sample.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            x = layer.initialize(&x, if i == last { labels } else { None })?;
        }
        Ok(x)
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let mut layers = self.layers.iter();
        let mut x = match layers.next() {
            Some(first) => first.predict(input)?,
            None => return Ok(input.clone()),
        };
        for layer in layers {
            x = layer.predict(&x)?;
        }
        Ok(x)
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        let mut layers = self.layers.iter_mut();
        let mut x = match layers.next() {
            Some(first) => first.begin_update(input, drop)?,
            None => return Ok(input.clone()),
        };
        for layer in layers {
            x = layer.begin_update(&x, drop)?;
        }
        Ok(x)
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let mut gradient = d_output.clone();
        for layer in self.layers.iter_mut().rev() {
            match layer.backprop(&gradient, sgd)? {
                Some(d) => gradient = d,
                None => return Ok(None),
            }
        }
        Ok(Some(gradient))
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        for layer in self.layers.iter_mut() {
            layer.visit_params(visitor);
        }
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Chain::new(self.layers.iter().map(|l| l.fresh_copy()).collect()))
    }
}

pub fn chain(first: Box<dyn Model>, second: Box<dyn Model>) -> Box<dyn Model> {
    Box::new(Chain::new(vec![first, second]))
}

/// `f >> g` is `chain(f, g)`.
impl Shr for Box<dyn Model> {
    type Output = Box<dyn Model>;

    fn shr(self, rhs: Box<dyn Model>) -> Box<dyn Model> {
        chain(self, rhs)
    }
}

// ---------------------------------------------------------------------------
// clone
// ---------------------------------------------------------------------------

/// Identity layer.
pub struct Noop {
    id: usize,
}

impl Noop {
    pub fn new() -> Noop {
        Noop { id: next_model_id() }
    }
}

impl Default for Noop {
    fn default() -> Self {
        Noop::new()
    }
}

impl Model for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        Ok(input.clone())
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        Ok(input.clone())
    }

    fn backprop(&mut self, d_output: &Batch, _sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        Ok(Some(d_output.clone()))
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Noop::new())
    }
}

/// Chains `n` copies of `model`; each copy gets its own weights.
/// `clone(f, 3)(x) == f''(f'(f(x)))`. With `n == 0` the result is the identity.
pub fn clone(model: Box<dyn Model>, n: usize) -> Box<dyn Model> {
    if n == 0 {
        return Box::new(Noop::new());
    }
    let mut layers = Vec::with_capacity(n);
    for _ in 1..n {
        layers.push(model.fresh_copy());
    }
    layers.insert(0, model);
    Box::new(Chain::new(layers))
}

// ---------------------------------------------------------------------------
// concatenate
// ---------------------------------------------------------------------------

/// Feeds the same input to every layer and joins their outputs column-wise:
/// `concatenate(f, g)(x) == hstack(f(x), g(x))`.
///
/// Works on `Floats` outputs and on `Ragged` outputs with equal lengths.
pub struct Concatenate {
    id: usize,
    layers: Vec<Box<dyn Model>>,
    widths: Option<Vec<usize>>,
}

impl Concatenate {
    pub fn new(layers: Vec<Box<dyn Model>>) -> Concatenate {
        Concatenate { id: next_model_id(), layers, widths: None }
    }

    fn join(&self, outputs: Vec<Batch>) -> NnResult<Batch> {
        let mut matrices = Vec::with_capacity(outputs.len());
        let mut shared_lengths: Option<Vec<usize>> = None;
        let mut ragged = false;
        for (i, output) in outputs.into_iter().enumerate() {
            match output {
                Batch::Floats(m) if !ragged => matrices.push(m),
                Batch::Ragged { data, lengths } if i == 0 || ragged => {
                    if let Some(expected) = &shared_lengths {
                        if *expected != lengths {
                            return Err(NnError::InvalidConfig(
                                "concatenate: ragged outputs have different lengths".into(),
                            ));
                        }
                    }
                    ragged = true;
                    shared_lengths = Some(lengths);
                    matrices.push(data);
                }
                other => return Err(NnError::input_kind(self.name(), "floats", other.kind())),
            }
        }
        if let Some(first) = matrices.first() {
            if let Some(bad) = matrices.iter().find(|m| m.rows != first.rows) {
                return Err(NnError::shape(self.name(), (first.rows, bad.cols), bad.shape()));
            }
        }
        let refs: Vec<&Matrix> = matrices.iter().collect();
        let data = Matrix::hstack(&refs);
        Ok(match shared_lengths {
            Some(lengths) => Batch::Ragged { data, lengths },
            None => Batch::Floats(data),
        })
    }
}

fn output_width(output: &Batch) -> usize {
    match output {
        Batch::Floats(m) => m.cols,
        Batch::Ragged { data, .. } => data.cols,
        _ => 0,
    }
}

impl Model for Concatenate {
    fn name(&self) -> &str {
        "concatenate"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        self.layers.first().and_then(|l| l.nr_in())
    }

    fn nr_out(&self) -> Option<usize> {
        self.layers.iter().map(|l| l.nr_out()).sum()
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        &self.layers
    }

    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        let outputs = self.layers.iter_mut()
            .map(|l| l.initialize(sample, labels))
            .collect::<NnResult<Vec<_>>>()?;
        self.join(outputs)
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let outputs = self.layers.iter()
            .map(|l| l.predict(input))
            .collect::<NnResult<Vec<_>>>()?;
        self.join(outputs)
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        let outputs = self.layers.iter_mut()
            .map(|l| l.begin_update(input, drop))
            .collect::<NnResult<Vec<_>>>()?;
        self.widths = Some(outputs.iter().map(output_width).collect());
        self.join(outputs)
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let widths = self.widths.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let (d_data, lengths) = match d_output {
            Batch::Floats(m) => (m, None),
            Batch::Ragged { data, lengths } => (data, Some(lengths)),
            other => return Err(NnError::input_kind(self.name(), "floats", other.kind())),
        };
        let total: usize = widths.iter().sum();
        if d_data.cols != total {
            return Err(NnError::shape(self.name(), (d_data.rows, total), d_data.shape()));
        }

        let mut d_input: Option<Batch> = None;
        let mut start = 0;
        for (layer, width) in self.layers.iter_mut().zip(widths) {
            let piece = d_data.slice_cols(start..start + width);
            start += width;
            let piece = match lengths {
                Some(lengths) => Batch::Ragged { data: piece, lengths: lengths.clone() },
                None => Batch::Floats(piece),
            };
            if let Some(d) = layer.backprop(&piece, sgd)? {
                d_input = Some(match d_input {
                    Some(acc) => acc.add(d)?,
                    None => d,
                });
            }
        }
        Ok(d_input)
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        for layer in self.layers.iter_mut() {
            layer.visit_params(visitor);
        }
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Concatenate::new(self.layers.iter().map(|l| l.fresh_copy()).collect()))
    }
}

pub fn concatenate(layers: Vec<Box<dyn Model>>) -> Box<dyn Model> {
    Box::new(Concatenate::new(layers))
}

/// `f | g` is `concatenate(vec![f, g])`.
impl BitOr for Box<dyn Model> {
    type Output = Box<dyn Model>;

    fn bitor(self, rhs: Box<dyn Model>) -> Box<dyn Model> {
        concatenate(vec![self, rhs])
    }
}

// ---------------------------------------------------------------------------
// ragged plumbing
// ---------------------------------------------------------------------------

/// `IdSeqs` → `RaggedIds`: flattens the per-text id lists and records the
/// length of each.
pub struct FlattenAddLengths {
    id: usize,
}

impl FlattenAddLengths {
    pub fn new() -> FlattenAddLengths {
        FlattenAddLengths { id: next_model_id() }
    }

    fn flatten(&self, input: &Batch) -> NnResult<Batch> {
        match input {
            Batch::IdSeqs(seqs) => Ok(Batch::RaggedIds {
                ids: seqs.iter().flatten().copied().collect(),
                lengths: seqs.iter().map(|s| s.len()).collect(),
            }),
            other => Err(NnError::input_kind(self.name(), "id sequences", other.kind())),
        }
    }
}

impl Default for FlattenAddLengths {
    fn default() -> Self {
        FlattenAddLengths::new()
    }
}

impl Model for FlattenAddLengths {
    fn name(&self) -> &str {
        "flatten_add_lengths"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        self.flatten(input)
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        self.flatten(input)
    }

    fn backprop(&mut self, _d_output: &Batch, _sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        Ok(None)
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(FlattenAddLengths::new())
    }
}

pub fn flatten_add_lengths() -> Box<dyn Model> {
    Box::new(FlattenAddLengths::new())
}

/// Applies a layer to the flat part of a `(data, lengths)` value and keeps
/// the lengths: `RaggedIds` gives the layer `Ids`, `Ragged` gives it `Floats`.
pub struct WithFlat {
    id: usize,
    layer: Vec<Box<dyn Model>>,
    lengths: Option<Vec<usize>>,
}

impl WithFlat {
    pub fn new(layer: Box<dyn Model>) -> WithFlat {
        WithFlat { id: next_model_id(), layer: vec![layer], lengths: None }
    }

    fn split(&self, input: &Batch) -> NnResult<(Batch, Vec<usize>)> {
        match input {
            Batch::RaggedIds { ids, lengths } => Ok((Batch::Ids(ids.clone()), lengths.clone())),
            Batch::Ragged { data, lengths } => Ok((Batch::Floats(data.clone()), lengths.clone())),
            other => Err(NnError::input_kind(self.name(), "ragged ids or floats", other.kind())),
        }
    }

    fn rejoin(&self, output: Batch, lengths: Vec<usize>) -> NnResult<Batch> {
        let data = output.into_floats(self.name())?;
        let total: usize = lengths.iter().sum();
        if data.rows != total {
            return Err(NnError::shape(self.name(), (total, data.cols), data.shape()));
        }
        Ok(Batch::Ragged { data, lengths })
    }
}

impl Model for WithFlat {
    fn name(&self) -> &str {
        "with_flat"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        self.layer[0].nr_in()
    }

    fn nr_out(&self) -> Option<usize> {
        self.layer[0].nr_out()
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        &self.layer
    }

    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        let (flat, lengths) = self.split(sample)?;
        let output = self.layer[0].initialize(&flat, labels)?;
        self.rejoin(output, lengths)
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let (flat, lengths) = self.split(input)?;
        let output = self.layer[0].predict(&flat)?;
        self.rejoin(output, lengths)
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        let (flat, lengths) = self.split(input)?;
        let output = self.layer[0].begin_update(&flat, drop)?;
        self.lengths = Some(lengths.clone());
        self.rejoin(output, lengths)
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let lengths = self.lengths.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let d_flat = match d_output {
            Batch::Ragged { data, .. } => Batch::Floats(data.clone()),
            other => return Err(NnError::input_kind(self.name(), "ragged floats", other.kind())),
        };
        Ok(match self.layer[0].backprop(&d_flat, sgd)? {
            Some(d) => Some(Batch::Ragged { data: d.into_floats(self.name())?, lengths }),
            None => None,
        })
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        self.layer[0].visit_params(visitor);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(WithFlat::new(self.layer[0].fresh_copy()))
    }
}

pub fn with_flat(layer: Box<dyn Model>) -> Box<dyn Model> {
    Box::new(WithFlat::new(layer))
}
