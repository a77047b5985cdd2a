pub mod analyze;
pub mod model;

pub use analyze::{analyze, Edge, EdgeKind, Report, Slot};
pub use model::{load_raw_bin, Image};
