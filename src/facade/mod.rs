pub mod cursor;
pub mod id_map;
pub mod messages;

pub use cursor::MapCursor;
pub use id_map::IdMapStore;
pub use messages::MessageIter;
