mod error;
mod memory;
pub mod repos;

pub use error::{DbError, DbResult};
pub use memory::MemoryUserRepo;
pub use repos::UserRepo;
