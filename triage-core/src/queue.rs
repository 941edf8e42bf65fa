use crate::config::QueueConfig;
use crate::error::TriageError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

/// Source of raw report payloads.
#[async_trait]
pub trait ReportQueue: Send {
    /// Wait until a message is available and return its body.
    ///
    /// The message is gone from the queue once this returns. Dropping the
    /// future while it waits may lose a message the broker already removed.
    async fn pop(&mut self) -> Result<Vec<u8>, TriageError>;
}

/// Redis list consumer. Producers `LPUSH`, so popping from the right end keeps
/// delivery in arrival order.
pub struct RedisQueue {
    client: redis::Client,
    connection: Option<MultiplexedConnection>,
    name: String,
    poll_timeout_secs: u64,
}

impl RedisQueue {
    /// Does not connect; the first `pop` or `ping` does.
    pub fn new(config: &QueueConfig) -> Result<Self, TriageError> {
        Ok(Self {
            client: redis::Client::open(config.url())?,
            connection: None,
            name: config.name.clone(),
            poll_timeout_secs: config.poll_timeout_secs.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn ping(&mut self) -> Result<String, TriageError> {
        let conn = self.connection().await?;
        let reply: Result<String, redis::RedisError> = redis::cmd("PING").query_async(conn).await;
        reply.map_err(|e| self.reset(e))
    }

    async fn connection(&mut self) -> Result<&mut MultiplexedConnection, TriageError> {
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => {
                let conn = self.client.get_multiplexed_async_connection().await?;
                tracing::info!(queue = %self.name, "Connected to Redis");
                conn
            }
        };
        Ok(self.connection.insert(conn))
    }

    /// Drop the connection so the next call reconnects.
    fn reset(&mut self, e: redis::RedisError) -> TriageError {
        self.connection = None;
        e.into()
    }
}

#[async_trait]
impl ReportQueue for RedisQueue {
    async fn pop(&mut self) -> Result<Vec<u8>, TriageError> {
        let name = self.name.clone();
        let window = self.poll_timeout_secs;

        loop {
            let conn = self.connection().await?;
            let reply: Result<Option<(String, Vec<u8>)>, redis::RedisError> = redis::cmd("BRPOP")
                .arg(&name)
                .arg(window)
                .query_async(conn)
                .await;

            match reply {
                Ok(Some((_, body))) => return Ok(body),
                // Window elapsed with an empty list.
                Ok(None) => continue,
                Err(e) => return Err(self.reset(e)),
            }
        }
    }
}
