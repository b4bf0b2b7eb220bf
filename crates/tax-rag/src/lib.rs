pub mod config;
pub mod corpus;
pub mod error;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod server;
pub mod store;
