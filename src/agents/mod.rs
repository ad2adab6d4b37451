pub mod chat;
pub mod intent;
pub mod memory;
pub mod prompts;
pub mod sentiment;
pub mod summarizer;
pub mod topics;

pub use chat::{ChatAgent, ChatTurn, TurnState};
pub use intent::{Intent, IntentClassifier, Tool, TOOLS};
pub use memory::ConversationStore;
pub use sentiment::{aggregate_share, fan_out, SentimentClassifier};
pub use summarizer::Summarizer;
pub use topics::TopicExtractor;
