pub mod devirt;
pub mod stats;
