pub mod build_pricer;
pub mod market;
pub mod resolver;
