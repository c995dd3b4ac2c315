pub mod balance;
pub mod description;
pub mod design;
pub mod durations;
pub mod error;
pub mod labels;
pub mod math;
pub mod shuffle;
pub mod timeline;
pub mod tree;
pub mod trials;

pub use design::*;
pub use error::*;
pub use timeline::*;
pub use trials::*;
