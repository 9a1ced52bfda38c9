pub mod account;
pub mod object;

pub use account::{Account, Role, RoleSet};
pub use object::WorldObject;
