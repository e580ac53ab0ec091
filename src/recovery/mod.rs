pub mod archive;
pub mod config;
pub mod csv_index;
pub mod document;
pub mod ledger;
pub mod pipeline;
pub mod warn;
