pub mod chat;
pub mod events;
pub mod images;
pub mod policy;
pub mod runs;
pub mod slots;
