pub mod access;
pub mod read_status;
pub mod room_bus;

pub use access::{AccessControl, StaticAccess};
pub use room_bus::RoomBus;
