//! Standard process library
//!
//! Small building blocks for wiring workflows: transforms, joins, sources
//! and fan-out.

mod broadcast;
mod combine;
mod debug;
mod source;
mod time;
mod transform;

pub use broadcast::Broadcast;
pub use combine::Combine;
pub use debug::Tap;
pub use source::Constant;
pub use time::Delay;
pub use transform::Transform;
