pub mod cli;
pub mod fetch;
pub mod pipeline;
pub mod worker;
