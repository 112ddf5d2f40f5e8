//! Per-telescope image embedding
//!
//! One convolutional block and one dense projection are shared by every
//! telescope position. Both are built once; embedding telescope `t` only reads
//! the shared parameters.

use super::blocks::{CnnBlockKind, ConvBlock};
use super::layers::{flatten, Activation, Dense};
use super::params::{scoped, ParamStore};
use crate::data::TelescopeLayout;
use crate::error::{ModelError, Result};
use ndarray::{Array2, Array4, Array5, Axis};
use std::path::Path;
use tracing::{debug, info};

/// Scope of the convolutional block parameters
pub const CNN_BLOCK_SCOPE: &str = "cnn_block";

/// Scope of everything after the convolutional block
pub const NETWORK_HEAD_SCOPE: &str = "network_head";

#[derive(Debug)]
pub struct TelescopeEmbedder {
    block: Box<dyn ConvBlock>,
    projection: Dense,
    image_shape: (usize, usize, usize),
}

impl TelescopeEmbedder {
    /// Builds the shared block and projection
    ///
    /// When `pretrained_weights` is given, the block's scope is restored from
    /// that checkpoint right after its parameters are created, before any
    /// image passes through it.
    pub fn build(
        kind: CnnBlockKind,
        layout: &TelescopeLayout,
        embedding_size: usize,
        pretrained_weights: Option<&Path>,
        store: &mut ParamStore,
    ) -> Result<Self> {
        let (width, length, depth) = layout.image_shape();
        let block = kind.create(CNN_BLOCK_SCOPE, depth);
        block.build(store)?;

        if let Some(path) = pretrained_weights {
            let block_prefix = format!("{}/", CNN_BLOCK_SCOPE);
            let restored =
                store.restore_from_checkpoint(path, &[(block_prefix.as_str(), block_prefix.as_str())])?;
            info!("Initialised {} {} tensors from {}", restored, kind, path.display());
        }

        // The flattened width depends only on the image geometry, so one
        // zero image is enough to size the projection.
        let probe = block.forward(store, &Array4::zeros((1, width, length, depth)), false)?;
        let flattened = probe.len();
        debug!("{} block output {:?} -> {} features", kind, probe.shape(), flattened);

        let projection = Dense::new(
            scoped(NETWORK_HEAD_SCOPE, "image_embedding"),
            flattened,
            embedding_size,
            Activation::Relu,
        );
        projection.build(store)?;

        Ok(Self {
            block,
            projection,
            image_shape: (width, length, depth),
        })
    }

    pub fn kind(&self) -> CnnBlockKind {
        self.block.kind()
    }

    pub fn embedding_size(&self) -> usize {
        self.projection.out_features
    }

    /// Embeds one telescope's images: [batch, width, length, depth] -> [batch, embedding]
    pub fn embed(&self, store: &ParamStore, images: &Array4<f32>, is_training: bool) -> Result<Array2<f32>> {
        let (_, width, length, depth) = images.dim();
        if (width, length, depth) != self.image_shape {
            return Err(ModelError::shape_mismatch(
                "telescope image",
                self.image_shape,
                (width, length, depth),
            ));
        }
        let features = self.block.forward(store, images, is_training)?;
        self.projection.forward(store, &flatten(&features)?)
    }

    /// Embeds every telescope in index order
    ///
    /// `telescope_data` is telescope-major: [telescope, batch, width, length, depth].
    pub fn embed_all(
        &self,
        store: &ParamStore,
        telescope_data: &Array5<f32>,
        is_training: bool,
    ) -> Result<Vec<Array2<f32>>> {
        telescope_data
            .axis_iter(Axis(0))
            .map(|images| self.embed(store, &images.to_owned(), is_training))
            .collect()
    }
}

/// Multiplies each telescope's embedding by its trigger flag
///
/// `triggers` is [batch, telescope]; `embeddings[t]` is [batch, embedding].
pub fn zero_untriggered(embeddings: &mut [Array2<f32>], triggers: &Array2<f32>) {
    for (t, embedding) in embeddings.iter_mut().enumerate() {
        let mask = triggers.column(t).insert_axis(Axis(1));
        *embedding *= &mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(num_telescopes: usize) -> TelescopeLayout {
        TelescopeLayout {
            telescope_type: "LST".to_string(),
            num_telescopes,
            image_width: 4,
            image_length: 4,
            image_depth: 1,
            num_aux_inputs: 3,
        }
    }

    #[test]
    fn test_embed_all_shapes() {
        let mut store = ParamStore::new(Some(3));
        let embedder =
            TelescopeEmbedder::build(CnnBlockKind::Basic, &layout(3), 16, None, &mut store).unwrap();

        let data = Array5::from_elem((3, 2, 4, 4, 1), 0.25);
        let embeddings = embedder.embed_all(&store, &data, false).unwrap();

        assert_eq!(embeddings.len(), 3);
        for embedding in &embeddings {
            assert_eq!(embedding.shape(), &[2, 16]);
            assert!(embedding.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_identical_images_identical_embeddings() {
        let mut store = ParamStore::new(Some(3));
        let embedder =
            TelescopeEmbedder::build(CnnBlockKind::Basic, &layout(4), 8, None, &mut store).unwrap();

        let data = Array5::from_shape_fn((4, 2, 4, 4, 1), |(_, b, x, y, _)| (b + x * y) as f32 * 0.1);
        let embeddings = embedder.embed_all(&store, &data, false).unwrap();
        for embedding in &embeddings[1..] {
            assert_eq!(embedding, &embeddings[0]);
        }
    }

    #[test]
    fn test_embedder_params_do_not_depend_on_telescope_count() {
        let mut one = ParamStore::new(Some(1));
        TelescopeEmbedder::build(CnnBlockKind::Basic, &layout(1), 32, None, &mut one).unwrap();

        let mut eight = ParamStore::new(Some(1));
        TelescopeEmbedder::build(CnnBlockKind::Basic, &layout(8), 32, None, &mut eight).unwrap();

        assert_eq!(one.num_params(), eight.num_params());
    }

    #[test]
    fn test_wrong_image_shape_rejected() {
        let mut store = ParamStore::new(Some(3));
        let embedder =
            TelescopeEmbedder::build(CnnBlockKind::Basic, &layout(1), 8, None, &mut store).unwrap();
        assert!(embedder
            .embed(&store, &Array4::zeros((1, 5, 4, 1)), false)
            .is_err());
    }

    #[test]
    fn test_zero_untriggered() {
        let mut embeddings = vec![Array2::ones((2, 3)), Array2::ones((2, 3))];
        let triggers = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 1.0, 1.0]).unwrap();
        zero_untriggered(&mut embeddings, &triggers);

        assert_eq!(embeddings[0].sum(), 6.0);
        assert_eq!(embeddings[1].row(0).sum(), 0.0);
        assert_eq!(embeddings[1].row(1).sum(), 3.0);
    }
}
