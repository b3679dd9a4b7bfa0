pub mod chat;
pub mod conversation;
pub mod events;
pub mod frames;
pub mod prefs;
pub mod prompts;
