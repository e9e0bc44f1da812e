pub mod analytics;
pub mod bar;
pub mod features;
pub mod job;
pub mod model;
pub mod prediction;
pub mod time;

pub use analytics::*;
pub use bar::*;
pub use features::*;
pub use job::*;
pub use model::*;
pub use prediction::*;
