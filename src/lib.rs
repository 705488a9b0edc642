pub mod chain;
pub mod checker;
pub mod config;
pub mod debugger;
pub mod deployment;
pub mod network;
pub mod node;
pub mod project_context;
pub mod proxy;
pub mod scripts;
pub mod settings;
pub mod util;
pub mod version;
pub mod wallet;
