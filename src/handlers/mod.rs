pub mod stats;
pub mod ws;
