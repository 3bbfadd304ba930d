pub mod driver;
pub mod layout;
pub mod lookup;
