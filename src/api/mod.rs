pub mod traits;

pub use traits::{PlayQueueApi, TimelineApi};
