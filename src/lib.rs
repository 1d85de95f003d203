pub mod env;
pub mod errors;
pub mod host;
pub mod ledger;
pub mod logging;
pub mod module;
pub mod orchestrator;
pub mod procedure;
pub mod report;
pub mod runner;
pub mod step;
pub mod ui;
