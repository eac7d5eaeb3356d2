//! Dense tanh network standing behind the forward-pass contract.
//!
//! Hidden layers use tanh, the output layer is linear; layer widths come from
//! `layer_dims` including the input and output sizes. Inverse-problem
//! coefficients are registered as extra trainable tensors in the same
//! variable store, so one optimizer updates network weights and inverse
//! parameters jointly.

use tch::nn::{self, Module};
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};
use crate::params::{CoefficientMap, InverseParams};

/// Declaration of one trainable inverse parameter.
#[derive(Debug, Clone)]
pub struct InverseSpec {
    pub name: String,
    pub dims: Vec<i64>,
    pub init: f64,
}

impl InverseSpec {
    pub fn new(name: &str, dims: &[i64], init: f64) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.to_vec(),
            init,
        }
    }
}

/// Feed-forward network for one or more physical fields: input batch
/// `(N, layer_dims[0])`, output batch `(N, layer_dims[last])`.
#[derive(Debug)]
pub struct FieldNet {
    vs: nn::VarStore,
    net: nn::Sequential,
    inverse: InverseParams,
    layer_dims: Vec<i64>,
    kind: Kind,
}

impl FieldNet {
    pub fn new(
        layer_dims: &[i64],
        kind: Kind,
        device: Device,
        inverse_specs: &[InverseSpec],
    ) -> Result<Self> {
        match kind {
            Kind::Float | Kind::Double => {}
            other => {
                return Err(Error::InvalidDType {
                    expected: Kind::Float,
                    found: other,
                })
            }
        }
        if layer_dims.len() < 2 {
            return Err(Error::shape(
                "layer dims need at least input and output sizes",
                vec![2],
                vec![layer_dims.len() as i64],
            ));
        }

        let mut vs = nn::VarStore::new(device);
        let mut net = nn::seq();
        let mut inverse = CoefficientMap::new();
        {
            let root = vs.root();
            for (i, pair) in layer_dims.windows(2).enumerate() {
                net = net.add(nn::linear(
                    &root / format!("layer{}", i + 1),
                    pair[0],
                    pair[1],
                    Default::default(),
                ));
                if i + 2 < layer_dims.len() {
                    net = net.add_fn(|x| x.tanh());
                }
            }
            for spec in inverse_specs {
                let var = root.var(&spec.name, &spec.dims, nn::Init::Const(spec.init));
                inverse.set(&spec.name, var);
            }
        }
        if kind == Kind::Double {
            vs.double();
        }

        Ok(Self {
            vs,
            net,
            inverse,
            layer_dims: layer_dims.to_vec(),
            kind,
        })
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        self.net.forward(xs)
    }

    pub fn input_dim(&self) -> i64 {
        self.layer_dims[0]
    }

    pub fn output_dim(&self) -> i64 {
        self.layer_dims[self.layer_dims.len() - 1]
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Trainable inverse parameters, if this model carries any.
    pub fn inverse_params(&self) -> Option<&InverseParams> {
        if self.inverse.is_empty() {
            None
        } else {
            Some(&self.inverse)
        }
    }
}
