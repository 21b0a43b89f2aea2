use exponential_backoff::Backoff;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

const RETRY_MAX_TRIES: u32 = 3;
const RETRY_BACKOFF_MIN: Duration = Duration::from_millis(20);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("broken pipe")]
    BrokenPipe,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("unexpected eof")]
    UnexpectedEof,
    #[error("topic '{0}' already exists")]
    TopicAlreadyExists(String),
    #[error("config '{name}' was not found on the broker")]
    ConfigNotFound { name: String },
    #[error("{0}")]
    Other(String),
}

impl AdminError {
    /// Whether the underlying connection is gone and a reset is worth
    /// trying before the next attempt.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            AdminError::BrokenPipe | AdminError::ConnectionClosed | AdminError::UnexpectedEof
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDetail {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
}

/// Raw broker metadata operations, implemented by the concrete bus client.
#[async_trait::async_trait]
pub trait AdminApi: Send + Sync {
    async fn all_brokers(&self) -> Result<Vec<Broker>, AdminError>;

    async fn broker_config(&self, name: &str) -> Result<String, AdminError>;

    async fn topic_config(&self, topic: &str, name: &str) -> Result<String, AdminError>;

    /// Metadata for `topics`; topics the broker does not know are absent
    /// from the result.
    async fn topics_meta(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, TopicDetail>, AdminError>;

    async fn create_topic(&self, detail: &TopicDetail, validate_only: bool)
        -> Result<(), AdminError>;
}

/// Builds a fresh connected [`AdminApi`]; called once at construction and
/// again on every connection reset.
pub type AdminFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Box<dyn AdminApi>, AdminError>> + Send + Sync>;

/// The retry envelope around an [`AdminApi`]: every query runs under
/// exponential backoff, and a disconnect-class failure replaces the
/// underlying client with a freshly built one before the next attempt.
pub struct RetryAdminClient {
    factory: AdminFactory,
    inner: Mutex<Box<dyn AdminApi>>,
}

impl RetryAdminClient {
    pub async fn new(factory: AdminFactory) -> Result<Self, AdminError> {
        let inner = factory().await?;
        Ok(Self {
            factory,
            inner: Mutex::new(inner),
        })
    }

    async fn query_with_retry<T, F>(&self, query: F) -> Result<T, AdminError>
    where
        F: for<'a> Fn(&'a dyn AdminApi) -> BoxFuture<'a, Result<T, AdminError>>,
    {
        let backoff = Backoff::new(RETRY_MAX_TRIES, RETRY_BACKOFF_MIN, Some(RETRY_BACKOFF_MAX));
        let mut attempt = 0u32;
        loop {
            let result = {
                let guard = self.inner.lock().await;
                query(guard.as_ref()).await
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            let Some(delay) = backoff.next(attempt) else {
                return Err(err);
            };
            tracing::warn!(?err, attempt, "metadata query failed, retrying");

            if err.is_disconnect() {
                match (self.factory)().await {
                    Ok(fresh) => {
                        *self.inner.lock().await = fresh;
                        tracing::info!("admin client was reset");
                    }
                    Err(reset_err) => {
                        tracing::warn!(?reset_err, "admin client reset failed");
                    }
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn all_brokers(&self) -> Result<Vec<Broker>, AdminError> {
        self.query_with_retry(|admin| Box::pin(admin.all_brokers()))
            .await
    }

    pub async fn broker_config(&self, name: &str) -> Result<String, AdminError> {
        let name = name.to_owned();
        self.query_with_retry(|admin| {
            let name = name.clone();
            Box::pin(async move { admin.broker_config(&name).await })
        })
        .await
    }

    pub async fn topic_config(&self, topic: &str, name: &str) -> Result<String, AdminError> {
        let topic = topic.to_owned();
        let name = name.to_owned();
        self.query_with_retry(|admin| {
            let topic = topic.clone();
            let name = name.clone();
            Box::pin(async move { admin.topic_config(&topic, &name).await })
        })
        .await
    }

    pub async fn topics_meta(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, TopicDetail>, AdminError> {
        let topics = topics.to_owned();
        self.query_with_retry(|admin| {
            let topics = topics.clone();
            Box::pin(async move { admin.topics_meta(&topics).await })
        })
        .await
    }

    /// Create `detail`, treating already-exists as success.
    pub async fn create_topic(
        &self,
        detail: &TopicDetail,
        validate_only: bool,
    ) -> Result<(), AdminError> {
        let detail = detail.to_owned();
        let result = self
            .query_with_retry(|admin| {
                let detail = detail.clone();
                Box::pin(async move { admin.create_topic(&detail, validate_only).await })
            })
            .await;
        match result {
            Err(AdminError::TopicAlreadyExists(_)) => Ok(()),
            other => other,
        }
    }
}
