pub mod coordination;
pub mod repository;
pub mod worker;

pub use coordination::*;
pub use repository::*;
pub use worker::*;
