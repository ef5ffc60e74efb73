pub mod aggregate;
pub mod compute;
pub mod fetch;
pub mod market;
pub mod parse;
pub mod reparse;
