//! Index structures built alongside partition data.

mod bitmap;

pub use bitmap::{BitmapIndex, INDEX_FORMAT_VERSION};
