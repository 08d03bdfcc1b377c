//! regrove: incremental random forests for binary classification.
//!
//! A [`Forest`] maintains an ensemble of decision trees under a stream of
//! sample additions and removals. Tree structure is preserved across
//! updates: split decisions are re-evaluated only where an update touches
//! the counters, so the amortized cost of an update is proportional to tree
//! depth rather than dataset size.
//!
//! Mutations are staged and reconciled in batches:
//!
//! - [`Forest::add`] / [`Forest::remove`] record pending changes,
//! - [`Forest::commit`] routes each pending sample to a deterministic
//!   two-of-three subset of trees and applies the batches,
//! - [`Forest::classify`] answers queries at any time (committing first).
//!
//! Targets are binary: a sample counts as class 1 when `y >= 0.5`. Features
//! are sparse integer-coded binaries: a feature is present in a sample when
//! its value is `> 0.5`, and missing entries mean absent.
//!
//! ```
//! use regrove::{Forest, Sample};
//!
//! let mut forest = Forest::new(3);
//! forest.add(Sample::new("a", [(1, 1.0)], 1.0));
//! forest.add(Sample::new("b", [], 0.0));
//! forest.commit();
//!
//! let p = forest.classify(&Sample::new("probe", [(1, 1.0)], 0.0));
//! assert!((0.0..=1.0).contains(&p));
//! ```

pub mod forest;
pub mod hash;
pub mod io;
pub mod sample;
pub mod store;
pub mod tree;

pub use forest::{Forest, ForestStats, TreeStats};
pub use io::LoadError;
pub use sample::{Sample, SampleHandle};
