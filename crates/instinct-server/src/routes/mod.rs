pub mod events;
pub mod reflexes;
