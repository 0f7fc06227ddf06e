//! Training data preparation
//!
//! Raw utterances are normalized to the codec sample rate, encoded into code
//! grids, and collated into padded batches with BOS/EOS framing.

mod collate;
mod dataset;

pub use collate::{collate_list, ValleArCollate, ValleBatch, ValleItem};
pub use dataset::{DataLoader, RawExample, Split, ValleDataset};
