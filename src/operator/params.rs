//! Named kernel parameters.
//!
//! Each named parameter is either a numeric array that participates in batch
//! broadcasting or an opaque value carried through to the covariance function
//! unchanged. The split is made once, at insertion, and the two kinds are
//! stored as separate name→value mappings.

use ndarray::ArrayD;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single named parameter value.
#[derive(Clone)]
pub enum ParamValue<T> {
    /// Numeric array shaped `(batch.., P1, P2)`; broadcast with the data.
    Tensor(ArrayD<T>),
    /// Passed through to the covariance function unchanged.
    Opaque(Arc<dyn Any + Send + Sync>),
}

/// Named parameters for a covariance function, split into tensor-valued and
/// opaque mappings.
pub struct Params<T> {
    tensor: BTreeMap<String, ArrayD<T>>,
    opaque: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl<T> Params<T> {
    pub fn new() -> Self {
        Self {
            tensor: BTreeMap::new(),
            opaque: BTreeMap::new(),
        }
    }

    /// Insert a parameter, routing it to the tensor or opaque mapping.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue<T>) {
        match value {
            ParamValue::Tensor(a) => {
                self.tensor.insert(name.into(), a);
            }
            ParamValue::Opaque(v) => {
                self.opaque.insert(name.into(), v);
            }
        }
    }

    /// Builder-style tensor parameter.
    pub fn with_tensor(mut self, name: impl Into<String>, value: ArrayD<T>) -> Self {
        self.tensor.insert(name.into(), value);
        self
    }

    /// Builder-style opaque parameter.
    pub fn with_opaque<V: Any + Send + Sync>(mut self, name: impl Into<String>, value: V) -> Self {
        self.opaque.insert(name.into(), Arc::new(value));
        self
    }

    /// Look up a tensor parameter by name.
    pub fn tensor(&self, name: &str) -> Option<&ArrayD<T>> {
        self.tensor.get(name)
    }

    /// Look up an opaque parameter by name, downcast to `V`.
    pub fn opaque<V: Any + Send + Sync>(&self, name: &str) -> Option<&V> {
        self.opaque.get(name).and_then(|v| v.downcast_ref::<V>())
    }

    /// Iterate over the tensor parameters.
    pub fn tensors(&self) -> impl Iterator<Item = (&str, &ArrayD<T>)> {
        self.tensor.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.tensor.is_empty() && self.opaque.is_empty()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<String, ArrayD<T>>,
        BTreeMap<String, Arc<dyn Any + Send + Sync>>,
    ) {
        (self.tensor, self.opaque)
    }

    pub(crate) fn from_parts(
        tensor: BTreeMap<String, ArrayD<T>>,
        opaque: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self { tensor, opaque }
    }

    /// Rebuild with every tensor parameter transformed; opaque values are
    /// shared untouched.
    pub(crate) fn map_tensors<E>(
        &self,
        mut f: impl FnMut(&str, &ArrayD<T>) -> Result<ArrayD<T>, E>,
    ) -> Result<Params<T>, E> {
        let mut tensor = BTreeMap::new();
        for (name, value) in &self.tensor {
            tensor.insert(name.clone(), f(name, value)?);
        }
        Ok(Params {
            tensor,
            opaque: self.opaque.clone(),
        })
    }
}

impl<T: Clone> Clone for Params<T> {
    fn clone(&self) -> Self {
        Self {
            tensor: self.tensor.clone(),
            opaque: self.opaque.clone(),
        }
    }
}

impl<T> Default for Params<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Params<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Params")
            .field("tensor", &self.tensor.keys().collect::<Vec<_>>())
            .field("opaque", &self.opaque.keys().collect::<Vec<_>>())
            .finish()
    }
}
