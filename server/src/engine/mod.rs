pub mod broadcast;
pub mod chat_engine;
pub mod events;
pub mod formatter;
pub mod history;
pub mod registry;
pub mod user_session;
