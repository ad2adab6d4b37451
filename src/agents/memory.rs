use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::llm::Message;

struct Thread {
    history: Arc<Mutex<Vec<Message>>>,
    last_used: Instant,
}

impl Thread {
    /// A [`Conversation`] guard or a waiting turn holds another handle.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.history) > 1
    }
}

/// Per-thread conversation history. Holding a [`Conversation`] guard is what
/// keeps a second turn on the same thread waiting.
///
/// Threads idle for longer than `idle_ttl` are dropped when a new thread is
/// opened, and at most `max_threads` are kept (least recently used go first).
/// A thread with a turn in flight is never dropped.
pub struct ConversationStore {
    threads: Mutex<HashMap<String, Thread>>,
    max_messages: usize,
    idle_ttl: Duration,
    max_threads: usize,
}

pub struct Conversation {
    history: OwnedMutexGuard<Vec<Message>>,
    max_messages: usize,
}

impl Conversation {
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Appends a completed exchange, dropping the oldest messages past the limit.
    pub fn record(&mut self, user: Message, assistant: Message) {
        self.history.push(user);
        self.history.push(assistant);
        let excess = self.history.len().saturating_sub(self.max_messages);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }
}

impl ConversationStore {
    pub fn new(max_messages: usize, idle_ttl: Duration, max_threads: usize) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            max_messages,
            idle_ttl,
            max_threads: max_threads.max(1),
        }
    }

    /// Waits for any in-flight turn on `thread_id` and takes its history.
    pub async fn lock(&self, thread_id: &str) -> Conversation {
        let slot = {
            let mut threads = self.threads.lock().await;
            let now = Instant::now();
            if !threads.contains_key(thread_id) {
                self.evict(&mut threads, now);
            }
            let thread = threads.entry(thread_id.to_string()).or_insert_with(|| Thread {
                history: Arc::new(Mutex::new(Vec::new())),
                last_used: now,
            });
            thread.last_used = now;
            thread.history.clone()
        };

        Conversation {
            history: slot.lock_owned().await,
            max_messages: self.max_messages,
        }
    }

    pub async fn contains(&self, thread_id: &str) -> bool {
        self.threads.lock().await.contains_key(thread_id)
    }

    pub async fn history(&self, thread_id: &str) -> Vec<Message> {
        let slot = self.threads.lock().await.get(thread_id).map(|t| t.history.clone());
        match slot {
            Some(slot) => slot.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.lock().await.len()
    }

    /// Drops idle threads now. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let mut threads = self.threads.lock().await;
        self.evict(&mut threads, Instant::now())
    }

    /// Makes room for one more thread.
    fn evict(&self, threads: &mut HashMap<String, Thread>, now: Instant) -> usize {
        let before = threads.len();
        threads.retain(|_, t| t.in_use() || now.duration_since(t.last_used) < self.idle_ttl);

        while threads.len() >= self.max_threads {
            let oldest = threads
                .iter()
                .filter(|(_, t)| !t.in_use())
                .min_by_key(|(_, t)| t.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    threads.remove(&id);
                }
                None => break,
            }
        }

        let removed = before - threads.len();
        if removed > 0 {
            tracing::debug!("Evicted {} conversation threads, {} remain", removed, threads.len());
        }
        removed
    }
}
