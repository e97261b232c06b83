pub mod cipher;
pub mod error;
pub mod fetch;
pub mod model;
pub mod testcase;
pub mod token_exchange;
pub mod xml;
