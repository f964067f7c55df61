//! Data Transfer Objects for REST request/response serialization.

pub mod common_dto;
pub mod scheduler_dto;
pub mod token_dto;

pub use common_dto::*;
pub use scheduler_dto::*;
pub use token_dto::*;
