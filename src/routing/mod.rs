pub mod path_finder;

pub use path_finder::{Bottleneck, Path, PathCosting, PathFinder};
