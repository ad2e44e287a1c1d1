pub mod errors;
pub mod expired;
pub mod files;
pub mod matching;
pub mod merge;
pub mod model;
pub mod parsing;
pub mod print;
pub mod recon;
pub mod reconcile;
pub mod settings;
pub mod write;
