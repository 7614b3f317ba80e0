pub mod changes;
pub mod commands;
pub mod events;
pub mod metrics;
pub mod recommendations;
pub mod resources;

pub use changes::*;
pub use commands::*;
pub use events::*;
pub use metrics::*;
pub use recommendations::*;
pub use resources::*;
