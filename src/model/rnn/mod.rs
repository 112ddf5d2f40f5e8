//! Array-level recurrent aggregator
//!
//! - [`lstm`]: layer-normalised LSTM cell
//! - [`attention`]: attention wrapper with a window spanning the telescope count
//! - [`dynamic`]: unrolling over telescopes, masked by the number of triggers

pub mod attention;
pub mod dynamic;
pub mod lstm;

pub use attention::{AttentionLstm, AttentionState};
pub use dynamic::dynamic_rnn;
pub use lstm::{LayerNormLstmCell, LstmState};
