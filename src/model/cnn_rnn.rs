//! CNN-RNN array classifier
//!
//! Each telescope image is embedded by one shared convolutional block and
//! projection. The embeddings, with the auxiliary inputs appended, are read as
//! a sequence by an attention LSTM that stops at the number of triggered
//! telescopes. The output at the last valid step is projected to logits.

use super::blocks::CnnBlockKind;
use super::embedding::{zero_untriggered, TelescopeEmbedder, NETWORK_HEAD_SCOPE};
use super::layers::{Activation, Dense};
use super::params::{scoped, ParamStore};
use super::rnn::{dynamic_rnn, AttentionLstm};
use super::selector::gather_last_valid;
use super::triggers::valid_lengths;
use crate::data::{normalize_inputs, FeatureBatch, LabelBatch, ModelInputs, TelescopeLayout};
use crate::error::{ModelError, Result};
use crate::utils::ModelParams;
use ndarray::{concatenate, stack, Array1, Array2, ArrayView2, Axis};
use tracing::{debug, info};

/// Scope of the recurrent aggregator inside the network head
pub const ATTENTION_CELL_SCOPE: &str = "attention_cell";

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// (batch, num_classes)
    pub logits: Array2<f32>,
    /// Number of triggered telescopes per example
    pub valid_lengths: Array1<usize>,
}

#[derive(Debug)]
pub struct CnnRnnModel {
    layout: TelescopeLayout,
    embedder: TelescopeEmbedder,
    aggregator: AttentionLstm,
    classifier: Dense,
    zero_untriggered_embeddings: bool,
}

impl CnnRnnModel {
    /// Validates the configuration and creates every parameter in `store`
    ///
    /// Building twice against the same store reuses the existing parameters.
    pub fn new(params: &ModelParams, store: &mut ParamStore) -> Result<Self> {
        let layout = params.telescope_layout()?;
        let kind: CnnBlockKind = params.cnn_block_kind()?;

        if layout.num_telescopes == 0 {
            return Err(ModelError::MissingConfig(format!(
                "processed_num_telescopes[{}] must be positive",
                layout.telescope_type
            )));
        }
        if params.num_classes == 0 {
            return Err(ModelError::MissingConfig("num_classes must be positive".to_string()));
        }

        info!(
            "Building CNN-RNN: {} x {} telescopes, image {:?}, {} block",
            layout.num_telescopes,
            layout.telescope_type,
            layout.image_shape(),
            kind
        );

        let embedder = TelescopeEmbedder::build(
            kind,
            &layout,
            params.embedding_size,
            params.pretrained_weights.as_deref(),
            store,
        )?;

        let sequence_width = params.embedding_size + layout.num_aux_inputs;
        let aggregator = AttentionLstm::new(
            scoped(NETWORK_HEAD_SCOPE, ATTENTION_CELL_SCOPE),
            sequence_width,
            params.lstm_size,
            layout.num_telescopes,
        );
        aggregator.build(store)?;

        let classifier = Dense::new(
            scoped(NETWORK_HEAD_SCOPE, "logits"),
            params.lstm_size,
            params.num_classes,
            Activation::Linear,
        );
        classifier.build(store)?;

        info!(
            "Model parameters: {} total, {} in cnn_block, {} in network_head",
            store.num_params(),
            store.num_params_in_scope("cnn_block/"),
            store.num_params_in_scope("network_head/")
        );

        Ok(Self {
            layout,
            embedder,
            aggregator,
            classifier,
            zero_untriggered_embeddings: params.zero_untriggered_embeddings,
        })
    }

    pub fn layout(&self) -> &TelescopeLayout {
        &self.layout
    }

    pub fn cnn_block(&self) -> CnnBlockKind {
        self.embedder.kind()
    }

    /// Runs the network on reshaped inputs
    pub fn forward(&self, store: &ParamStore, inputs: &ModelInputs, is_training: bool) -> Result<ModelOutput> {
        let (sequence_output, lengths) = self.forward_features(store, inputs, is_training)?;
        let logits = self.classifier.forward(store, &sequence_output)?;
        Ok(ModelOutput {
            logits,
            valid_lengths: lengths,
        })
    }

    /// Recurrent output at each example's last valid step, (batch, lstm_size)
    pub fn forward_features(
        &self,
        store: &ParamStore,
        inputs: &ModelInputs,
        is_training: bool,
    ) -> Result<(Array2<f32>, Array1<usize>)> {
        if inputs.num_telescopes() != self.layout.num_telescopes {
            return Err(ModelError::shape_mismatch(
                "telescope_triggers",
                self.layout.num_telescopes,
                inputs.num_telescopes(),
            ));
        }

        let lengths = valid_lengths(&inputs.telescope_triggers);
        debug!("Valid lengths: {:?}", lengths);

        let mut embeddings = self.embedder.embed_all(store, &inputs.telescope_data, is_training)?;
        if self.zero_untriggered_embeddings {
            zero_untriggered(&mut embeddings, &inputs.telescope_triggers);
        }

        let views: Vec<ArrayView2<f32>> = embeddings.iter().map(|e| e.view()).collect();
        let embedded = stack(Axis(1), &views)?;
        let sequence = concatenate(Axis(2), &[embedded.view(), inputs.telescope_aux_inputs.view()])?;

        let (outputs, _) = dynamic_rnn(&self.aggregator, store, &sequence, &lengths)?;
        let last = gather_last_valid(&outputs, &lengths)?;
        Ok((last, lengths))
    }
}

/// Builds the model, reshapes the batch and returns the logits
pub fn cnn_rnn_model(
    features: &FeatureBatch,
    labels: &LabelBatch,
    params: &ModelParams,
    store: &mut ParamStore,
    is_training: bool,
) -> Result<Array2<f32>> {
    let model = CnnRnnModel::new(params, store)?;
    let inputs = normalize_inputs(features, labels, model.layout())?;
    Ok(model.forward(store, &inputs, is_training)?.logits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ModelParams {
        ModelParams::single_type("LST", [2, 2, 1], 3, 2, 2)
            .with_embedding_size(8)
            .with_lstm_size(6)
            .with_seed(5)
    }

    fn batch(batch_size: usize, triggers: Vec<f32>) -> (FeatureBatch, LabelBatch) {
        let features = FeatureBatch {
            telescope_data: (0..batch_size * 3 * 4).map(|i| (i % 7) as f32 * 0.1).collect(),
            telescope_triggers: triggers,
            telescope_aux_inputs: vec![0.5; batch_size * 3 * 2],
        };
        let labels = LabelBatch {
            gamma_hadron_label: vec![0; batch_size],
        };
        (features, labels)
    }

    #[test]
    fn test_forward_shapes() {
        let params = params();
        let mut store = ParamStore::new(params.seed);
        let model = CnnRnnModel::new(&params, &mut store).unwrap();

        let (features, labels) = batch(2, vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
        let inputs = normalize_inputs(&features, &labels, model.layout()).unwrap();
        let output = model.forward(&store, &inputs, false).unwrap();

        assert_eq!(output.logits.shape(), &[2, 2]);
        assert_eq!(output.valid_lengths.to_vec(), vec![2, 1]);
        assert!(output.logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_second_build_reuses_parameters() {
        let params = params();
        let mut store = ParamStore::new(params.seed);
        CnnRnnModel::new(&params, &mut store).unwrap();
        let count = store.len();
        let total = store.num_params();

        CnnRnnModel::new(&params, &mut store).unwrap();
        assert_eq!(store.len(), count);
        assert_eq!(store.num_params(), total);
    }

    #[test]
    fn test_head_parameter_names() {
        let params = params();
        let mut store = ParamStore::new(params.seed);
        CnnRnnModel::new(&params, &mut store).unwrap();

        assert!(store.contains("network_head/image_embedding/kernel"));
        assert!(store.contains("network_head/attention_cell/lstm/kernel"));
        assert!(store.contains("network_head/logits/kernel"));
        assert_eq!(store.get2("network_head/logits/kernel").unwrap().shape(), &[6, 2]);
    }

    #[test]
    fn test_telescope_count_must_match() {
        let params = params();
        let mut store = ParamStore::new(params.seed);
        let model = CnnRnnModel::new(&params, &mut store).unwrap();

        let other = TelescopeLayout {
            num_telescopes: 2,
            ..model.layout().clone()
        };
        let features = FeatureBatch {
            telescope_data: vec![0.0; 2 * 4],
            telescope_triggers: vec![1.0, 1.0],
            telescope_aux_inputs: vec![0.0; 2 * 2],
        };
        let labels = LabelBatch {
            gamma_hadron_label: vec![1],
        };
        let inputs = normalize_inputs(&features, &labels, &other).unwrap();
        assert!(model.forward(&store, &inputs, false).is_err());
    }

    #[test]
    fn test_zeroing_untriggered_changes_nothing_for_full_triggers() {
        let plain = params();
        let zeroed = params().with_zeroed_untriggered(true);
        let (features, labels) = batch(1, vec![1.0, 1.0, 1.0]);

        let mut store_a = ParamStore::new(plain.seed);
        let a = cnn_rnn_model(&features, &labels, &plain, &mut store_a, false).unwrap();
        let mut store_b = ParamStore::new(zeroed.seed);
        let b = cnn_rnn_model(&features, &labels, &zeroed, &mut store_b, false).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_zero_classes() {
        let mut params = params();
        params.num_classes = 0;
        let mut store = ParamStore::new(None);
        assert!(matches!(
            CnnRnnModel::new(&params, &mut store),
            Err(ModelError::MissingConfig(_))
        ));
    }
}
