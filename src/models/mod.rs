pub mod chunk;
pub mod feedback;
pub mod intent;
pub mod retrieval;

pub use chunk::*;
pub use feedback::*;
pub use intent::*;
pub use retrieval::*;
