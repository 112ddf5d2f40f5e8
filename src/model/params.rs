//! Named parameter store
//!
//! Every learnable tensor lives here under a scoped name such as
//! `cnn_block/conv1/kernel`. Layers never own weights: they create them
//! through [`ParamStore::get_or_create`] while the model is built and read them
//! through `&ParamStore` afterwards. Calling `get_or_create` again with the
//! same name returns the existing tensor, which is how a single set of weights
//! is shared by every telescope.

use crate::error::{ModelError, Result};
use ndarray::{ArrayD, ArrayView1, ArrayView2, ArrayView4, Ix1, Ix2, Ix4, IxDyn};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Weight initialisation schemes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Zeros,
    Ones,
    /// Glorot/Xavier uniform, the default for dense and conv kernels
    GlorotUniform,
    /// He/Kaiming normal
    HeNormal,
}

impl Initializer {
    fn sample(&self, shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
        match self {
            Initializer::Zeros => ArrayD::zeros(IxDyn(shape)),
            Initializer::Ones => ArrayD::ones(IxDyn(shape)),
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = compute_fans(shape);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                ArrayD::random_using(IxDyn(shape), Uniform::new(-limit, limit), rng)
            }
            Initializer::HeNormal => {
                let (fan_in, _) = compute_fans(shape);
                let std = (2.0 / fan_in as f32).sqrt();
                let normal: ArrayD<f32> = ArrayD::random_using(IxDyn(shape), StandardNormal, rng);
                normal * std
            }
        }
    }
}

/// Fan-in/fan-out for dense kernels [in, out] and conv kernels [kh, kw, in, out]
fn compute_fans(shape: &[usize]) -> (usize, usize) {
    let (fan_in, fan_out) = match shape.len() {
        0 => (1, 1),
        1 => (shape[0], shape[0]),
        2 => (shape[0], shape[1]),
        n => {
            let receptive: usize = shape[..n - 2].iter().product();
            (shape[n - 2] * receptive, shape[n - 1] * receptive)
        }
    };
    (fan_in.max(1), fan_out.max(1))
}

/// Joins a scope and a name with `/`
pub fn scoped(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", scope, name)
    }
}

/// A stored tensor
#[derive(Debug, Clone)]
pub struct Parameter {
    pub value: ArrayD<f32>,
    /// Moving statistics of batch normalisation are not trainable
    pub trainable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEntry {
    shape: Vec<usize>,
    values: Vec<f32>,
}

/// Registry of named parameters
#[derive(Debug)]
pub struct ParamStore {
    params: BTreeMap<String, Parameter>,
    rng: StdRng,
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ParamStore {
    /// Creates an empty store; a seed makes initialisation reproducible
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            params: BTreeMap::new(),
            rng,
        }
    }

    /// Returns `Ok(true)` when the parameter was created, `Ok(false)` when an
    /// existing one with the same shape is reused.
    pub fn get_or_create(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
        trainable: bool,
    ) -> Result<bool> {
        if let Some(existing) = self.params.get(name) {
            if existing.value.shape() != shape {
                return Err(ModelError::shape_mismatch(name, shape, existing.value.shape()));
            }
            return Ok(false);
        }

        let value = init.sample(shape, &mut self.rng);
        debug!("Created parameter {} {:?}", name, shape);
        self.params.insert(name.to_string(), Parameter { value, trainable });
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.params
            .get(name)
            .map(|p| &p.value)
            .ok_or_else(|| ModelError::MissingParameter(name.to_string()))
    }

    pub fn get1(&self, name: &str) -> Result<ArrayView1<'_, f32>> {
        Ok(self.get(name)?.view().into_dimensionality::<Ix1>()?)
    }

    pub fn get2(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
        Ok(self.get(name)?.view().into_dimensionality::<Ix2>()?)
    }

    pub fn get4(&self, name: &str) -> Result<ArrayView4<'_, f32>> {
        Ok(self.get(name)?.view().into_dimensionality::<Ix4>()?)
    }

    /// Overwrites an existing parameter with a value of the same shape
    pub fn set(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| ModelError::MissingParameter(name.to_string()))?;
        if param.value.shape() != value.shape() {
            return Err(ModelError::shape_mismatch(name, param.value.shape(), value.shape()));
        }
        param.value = value;
        Ok(())
    }

    /// Number of stored parameter tensors
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(|k| k.as_str())
    }

    /// Total number of scalar values
    pub fn num_params(&self) -> usize {
        self.params.values().map(|p| p.value.len()).sum()
    }

    pub fn num_trainable_params(&self) -> usize {
        self.params
            .values()
            .filter(|p| p.trainable)
            .map(|p| p.value.len())
            .sum()
    }

    /// Number of scalar values whose name starts with `prefix`
    pub fn num_params_in_scope(&self, prefix: &str) -> usize {
        self.params
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, p)| p.value.len())
            .sum()
    }

    /// Writes every parameter to a JSON checkpoint
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let checkpoint: BTreeMap<&str, CheckpointEntry> = self
            .params
            .iter()
            .map(|(name, p)| {
                (
                    name.as_str(),
                    CheckpointEntry {
                        shape: p.value.shape().to_vec(),
                        values: p.value.iter().cloned().collect(),
                    },
                )
            })
            .collect();
        let content = serde_json::to_string(&checkpoint)?;
        std::fs::write(path.as_ref(), content)?;
        info!(
            "Saved {} parameters to {}",
            checkpoint.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Initialises existing parameters from a checkpoint
    ///
    /// Each `(checkpoint_prefix, store_prefix)` pair assigns every store
    /// parameter under `store_prefix` from the checkpoint entry with the same
    /// suffix under `checkpoint_prefix`. Returns the number of tensors restored.
    pub fn restore_from_checkpoint<P: AsRef<Path>>(
        &mut self,
        path: P,
        assignment: &[(&str, &str)],
    ) -> Result<usize> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let checkpoint: BTreeMap<String, CheckpointEntry> = serde_json::from_str(&content)?;

        let mut restored = 0;
        for (checkpoint_prefix, store_prefix) in assignment {
            let targets: Vec<String> = self
                .params
                .keys()
                .filter(|name| name.starts_with(store_prefix))
                .cloned()
                .collect();
            if targets.is_empty() {
                return Err(ModelError::Checkpoint(format!(
                    "no parameters under scope {}",
                    store_prefix
                )));
            }

            for name in targets {
                let source = format!("{}{}", checkpoint_prefix, &name[store_prefix.len()..]);
                let entry = checkpoint.get(&source).ok_or_else(|| {
                    ModelError::Checkpoint(format!(
                        "{} not found in {}",
                        source,
                        path.as_ref().display()
                    ))
                })?;
                let value = ArrayD::from_shape_vec(IxDyn(&entry.shape), entry.values.clone())?;
                self.set(&name, value)?;
                debug!("Restored {} from {}", name, source);
                restored += 1;
            }
        }

        info!(
            "Restored {} tensors from {}",
            restored,
            path.as_ref().display()
        );
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_get_or_create_reuses() {
        let mut store = ParamStore::new(Some(7));
        assert!(store
            .get_or_create("dense/kernel", &[3, 4], Initializer::GlorotUniform, true)
            .unwrap());
        let first = store.get("dense/kernel").unwrap().clone();

        assert!(!store
            .get_or_create("dense/kernel", &[3, 4], Initializer::GlorotUniform, true)
            .unwrap());
        assert_eq!(store.get("dense/kernel").unwrap(), &first);
        assert_eq!(store.len(), 1);
        assert_eq!(store.num_params(), 12);
    }

    #[test]
    fn test_shape_conflict_rejected() {
        let mut store = ParamStore::new(Some(7));
        store
            .get_or_create("dense/kernel", &[3, 4], Initializer::Zeros, true)
            .unwrap();
        let err = store
            .get_or_create("dense/kernel", &[4, 3], Initializer::Zeros, true)
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_parameter() {
        let store = ParamStore::new(Some(1));
        assert!(matches!(
            store.get("nope"),
            Err(ModelError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_glorot_bounds() {
        let mut store = ParamStore::new(Some(3));
        store
            .get_or_create("w", &[10, 20], Initializer::GlorotUniform, true)
            .unwrap();
        let limit = (6.0f32 / 30.0).sqrt();
        assert!(store.get("w").unwrap().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_seeded_stores_match() {
        let mut a = ParamStore::new(Some(42));
        let mut b = ParamStore::new(Some(42));
        a.get_or_create("w", &[5, 5], Initializer::HeNormal, true).unwrap();
        b.get_or_create("w", &[5, 5], Initializer::HeNormal, true).unwrap();
        assert_eq!(a.get("w").unwrap(), b.get("w").unwrap());
    }

    #[test]
    fn test_scope_counts() {
        let mut store = ParamStore::new(Some(0));
        store.get_or_create("cnn_block/conv1/kernel", &[3, 3, 1, 4], Initializer::Zeros, true).unwrap();
        store.get_or_create("cnn_block/bn/moving_mean", &[4], Initializer::Zeros, false).unwrap();
        store.get_or_create("network_head/logits/kernel", &[8, 2], Initializer::Zeros, true).unwrap();

        assert_eq!(store.num_params_in_scope("cnn_block/"), 40);
        assert_eq!(store.num_params_in_scope("network_head/"), 16);
        assert_eq!(store.num_params(), 56);
        assert_eq!(store.num_trainable_params(), 52);
    }

    #[test]
    fn test_checkpoint_restore_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");

        let mut source = ParamStore::new(Some(1));
        source.get_or_create("cnn_block/w", &[2, 2], Initializer::GlorotUniform, true).unwrap();
        source.get_or_create("network_head/w", &[2, 2], Initializer::GlorotUniform, true).unwrap();
        source.save(&path).unwrap();

        let mut target = ParamStore::new(Some(2));
        target.get_or_create("cnn_block/w", &[2, 2], Initializer::Zeros, true).unwrap();
        target.get_or_create("network_head/w", &[2, 2], Initializer::Zeros, true).unwrap();

        let restored = target
            .restore_from_checkpoint(&path, &[("cnn_block/", "cnn_block/")])
            .unwrap();
        assert_eq!(restored, 1);

        let expected = source.get2("cnn_block/w").unwrap();
        let actual = target.get2("cnn_block/w").unwrap();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *e);
        }
        // Outside the assignment map nothing changes
        assert_eq!(target.get2("network_head/w").unwrap(), Array2::<f32>::zeros((2, 2)));
    }

    #[test]
    fn test_checkpoint_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");

        let mut source = ParamStore::new(Some(1));
        source.get_or_create("cnn_block/a", &[2], Initializer::Ones, true).unwrap();
        source.save(&path).unwrap();

        let mut target = ParamStore::new(Some(2));
        target.get_or_create("cnn_block/b", &[2], Initializer::Zeros, true).unwrap();
        let err = target
            .restore_from_checkpoint(&path, &[("cnn_block/", "cnn_block/")])
            .unwrap_err();
        assert!(matches!(err, ModelError::Checkpoint(_)));
    }

    #[test]
    fn test_checkpoint_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");

        let mut source = ParamStore::new(Some(1));
        source.get_or_create("cnn_block/a", &[3], Initializer::Ones, true).unwrap();
        source.save(&path).unwrap();

        let mut target = ParamStore::new(Some(2));
        target.get_or_create("cnn_block/a", &[2], Initializer::Zeros, true).unwrap();
        assert!(target
            .restore_from_checkpoint(&path, &[("cnn_block/", "cnn_block/")])
            .is_err());
    }

    #[test]
    fn test_compute_fans() {
        assert_eq!(compute_fans(&[3, 3, 2, 8]), (18, 72));
        assert_eq!(compute_fans(&[10, 4]), (10, 4));
        assert_eq!(compute_fans(&[5]), (5, 5));
    }

    #[test]
    fn test_scoped() {
        assert_eq!(scoped("cnn_block", "conv1"), "cnn_block/conv1");
        assert_eq!(scoped("", "conv1"), "conv1");
    }
}
