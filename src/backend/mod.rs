//! Backend module - trait contract, registry, and the service adapters

pub mod bfl;
pub mod fal;
pub mod ideogram;
pub mod leonardo;
pub mod openai;
pub mod recraft;
pub mod registry;
pub mod replicate;
pub mod stability;
pub mod together;
pub mod traits;
