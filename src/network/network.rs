use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::combinators::Chain;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

/// Builds a layer from a shape such as `[nr_out, nr_in]`.
pub type LayerFactory = Box<dyn Fn(&[usize]) -> NnResult<Box<dyn Model>> + Send + Sync>;

/// One entry of a network description: a ready-made model, or a shape that
/// the template turns into a layer depending on its position.
pub enum Component {
    Model(Box<dyn Model>),
    Shape(Vec<usize>),
}

impl Component {
    /// Parameter count a component contributes: a model's own count, or the
    /// product of a shape's dimensions.
    pub fn nr_weight(&self) -> usize {
        match self {
            Component::Model(model) => model.nr_weight(),
            Component::Shape(dims) if dims.is_empty() => 0,
            Component::Shape(dims) => dims.iter().product(),
        }
    }
}

/// Which factory builds a shape component at each position: `first` covers
/// the leading positions, `last` the trailing ones, `middle` everything else.
pub struct NetworkTemplate {
    pub name: String,
    pub first: Vec<LayerFactory>,
    pub middle: LayerFactory,
    pub last: Vec<LayerFactory>,
}

impl NetworkTemplate {
    pub fn new(name: impl Into<String>, middle: LayerFactory) -> Self {
        NetworkTemplate { name: name.into(), first: Vec::new(), middle, last: Vec::new() }
    }

    pub fn with_first(mut self, factory: LayerFactory) -> Self {
        self.first.push(factory);
        self
    }

    pub fn with_last(mut self, factory: LayerFactory) -> Self {
        self.last.push(factory);
        self
    }

    fn factory_for(&self, i: usize, n: usize) -> &LayerFactory {
        let last_start = n.saturating_sub(self.last.len());
        if i < self.first.len() {
            &self.first[i]
        } else if i >= last_start && i - last_start < self.last.len() {
            &self.last[i - last_start]
        } else {
            &self.middle
        }
    }
}

/// A model that chains together other models.
pub struct Network {
    id: usize,
    name: String,
    chain: Chain,
}

impl Network {
    pub fn new(template: &NetworkTemplate, components: Vec<Component>) -> NnResult<Network> {
        if components.is_empty() {
            return Err(NnError::InvalidConfig(format!("{}: network needs at least one layer", template.name)));
        }
        let nr_weight = Network::nr_weight_of(&components);
        let n = components.len();
        let layers = components.into_iter()
            .enumerate()
            .map(|(i, component)| match component {
                Component::Model(model) => Ok(model),
                Component::Shape(dims) => (template.factory_for(i, n))(&dims),
            })
            .collect::<NnResult<Vec<_>>>()?;
        tracing::debug!(network = %template.name, layers = n, nr_weight, "built network");
        Ok(Network { id: next_model_id(), name: template.name.clone(), chain: Chain::new(layers) })
    }

    /// Parameter count of a component list, before any layer is built.
    pub fn nr_weight_of(components: &[Component]) -> usize {
        components.iter().map(|c| c.nr_weight()).sum()
    }
}

impl Model for Network {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        self.chain.nr_in()
    }

    fn nr_out(&self) -> Option<usize> {
        self.chain.nr_out()
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        self.chain.layers()
    }

    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        self.chain.initialize(sample, labels)
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        self.chain.predict(input)
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        self.chain.begin_update(input, drop)
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        self.chain.backprop(d_output, sgd)
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        self.chain.visit_params(visitor);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        let layers = self.chain.layers().iter().map(|l| l.fresh_copy()).collect();
        Box::new(Network { id: next_model_id(), name: self.name.clone(), chain: Chain::new(layers) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Maxout, Softmax};

    fn template() -> NetworkTemplate {
        NetworkTemplate::new(
            "mlp",
            Box::new(|dims: &[usize]| -> NnResult<Box<dyn Model>> {
                Ok(Box::new(Maxout::new(dims[0], dims.get(1).copied(), 2)))
            }),
        )
        .with_last(Box::new(|dims: &[usize]| -> NnResult<Box<dyn Model>> {
            Ok(Box::new(Softmax::new(dims.first().copied(), dims.get(1).copied())))
        }))
    }

    #[test]
    fn shapes_are_built_by_position() {
        let components = vec![
            Component::Shape(vec![4, 3]),
            Component::Shape(vec![4, 4]),
            Component::Shape(vec![2, 4]),
        ];
        assert_eq!(Network::nr_weight_of(&components), 12 + 16 + 8);
        let net = Network::new(&template(), components).unwrap();
        let names: Vec<&str> = net.layers().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["maxout", "maxout", "softmax"]);
        assert_eq!(net.nr_in(), Some(3));
        assert_eq!(net.nr_out(), Some(2));
    }

    #[test]
    fn ready_made_models_are_kept() {
        let first: Box<dyn Model> = Box::new(Maxout::new(5, Some(2), 3));
        let id = first.id();
        let net = Network::new(&template(), vec![
            Component::Model(first),
            Component::Shape(vec![3, 5]),
        ]).unwrap();
        assert_eq!(net.layers()[0].id(), id);
        assert_eq!(net.layers()[1].name(), "softmax");
    }

    #[test]
    fn empty_network_is_rejected() {
        assert!(matches!(Network::new(&template(), vec![]), Err(NnError::InvalidConfig(_))));
    }
}
