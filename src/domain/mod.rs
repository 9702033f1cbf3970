pub mod aggregation;
pub mod decoder;
pub mod models;
pub mod reference;
pub mod settings;
