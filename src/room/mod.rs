mod code;
mod player;
mod registry;
mod room;

pub use code::normalize_room_code;
pub use player::PlayerInRoom;
pub use registry::RoomRegistry;
pub use room::{MAX_CAPACITY, MIN_CAPACITY, Room};
