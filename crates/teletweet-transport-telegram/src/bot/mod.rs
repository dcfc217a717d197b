/// Update conversion and the bot command menu
pub mod handlers;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// `ChatTransport` implementation backed by the Bot API
pub mod transport;

pub use transport::TelegramTransport;
