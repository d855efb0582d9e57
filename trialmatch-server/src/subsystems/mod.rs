pub mod conversation;
pub mod first_turn;
pub mod persist;
pub mod sessions;
