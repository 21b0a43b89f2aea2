use crate::{RetryAdminClient, SinkError, TopicDetail};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// TopicManager caches per-topic partition counts and lazily creates topics
/// that do not exist yet, with the configured default shape.
pub struct TopicManager {
    admin: Arc<RetryAdminClient>,
    default_detail: TopicDetail,
    partition_counts: Mutex<HashMap<String, i32>>,
}

impl TopicManager {
    pub fn new(admin: Arc<RetryAdminClient>, default_detail: TopicDetail) -> Self {
        Self {
            admin,
            default_detail,
            partition_counts: Mutex::new(HashMap::new()),
        }
    }

    /// The partition count of `topic`, fetched (and created, if absent on
    /// the broker) on first use.
    pub async fn partition_num(&self, topic: &str) -> Result<i32, SinkError> {
        if let Some(count) = self.partition_counts.lock().unwrap().get(topic) {
            return Ok(*count);
        }

        let meta = self.admin.topics_meta(&[topic.to_string()]).await?;
        let count = match meta.get(topic) {
            Some(detail) if detail.num_partitions > 0 => detail.num_partitions,
            _ => {
                let detail = TopicDetail {
                    name: topic.to_string(),
                    ..self.default_detail.clone()
                };
                self.admin.create_topic(&detail, false).await?;
                tracing::info!(
                    topic,
                    partitions = detail.num_partitions,
                    "created missing topic"
                );
                detail.num_partitions
            }
        };

        self.partition_counts
            .lock()
            .unwrap()
            .insert(topic.to_string(), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdminApi, AdminError, AdminFactory, Broker};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAdmin {
        meta_calls: Arc<AtomicUsize>,
        created: Arc<Mutex<Vec<TopicDetail>>>,
        known: HashMap<String, TopicDetail>,
    }

    #[async_trait::async_trait]
    impl AdminApi for CountingAdmin {
        async fn all_brokers(&self) -> Result<Vec<Broker>, AdminError> {
            Ok(vec![])
        }

        async fn broker_config(&self, name: &str) -> Result<String, AdminError> {
            Err(AdminError::ConfigNotFound {
                name: name.to_string(),
            })
        }

        async fn topic_config(&self, _topic: &str, name: &str) -> Result<String, AdminError> {
            Err(AdminError::ConfigNotFound {
                name: name.to_string(),
            })
        }

        async fn topics_meta(
            &self,
            topics: &[String],
        ) -> Result<HashMap<String, TopicDetail>, AdminError> {
            self.meta_calls.fetch_add(1, Ordering::SeqCst);
            Ok(topics
                .iter()
                .filter_map(|t| self.known.get(t).map(|d| (t.clone(), d.clone())))
                .collect())
        }

        async fn create_topic(
            &self,
            detail: &TopicDetail,
            _validate_only: bool,
        ) -> Result<(), AdminError> {
            self.created.lock().unwrap().push(detail.clone());
            Ok(())
        }
    }

    async fn manager(
        known: HashMap<String, TopicDetail>,
    ) -> (TopicManager, Arc<AtomicUsize>, Arc<Mutex<Vec<TopicDetail>>>) {
        let meta_calls = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(Mutex::new(Vec::new()));
        let factory: AdminFactory = {
            let meta_calls = meta_calls.clone();
            let created = created.clone();
            Box::new(move || {
                let admin = CountingAdmin {
                    meta_calls: meta_calls.clone(),
                    created: created.clone(),
                    known: known.clone(),
                };
                Box::pin(async move { Ok(Box::new(admin) as Box<dyn AdminApi>) })
            })
        };
        let admin = Arc::new(RetryAdminClient::new(factory).await.unwrap());
        let manager = TopicManager::new(
            admin,
            TopicDetail {
                name: String::new(),
                num_partitions: 6,
                replication_factor: 1,
            },
        );
        (manager, meta_calls, created)
    }

    #[tokio::test]
    async fn partition_counts_are_cached() {
        let known = HashMap::from([(
            "events".to_string(),
            TopicDetail {
                name: "events".to_string(),
                num_partitions: 12,
                replication_factor: 3,
            },
        )]);
        let (manager, meta_calls, created) = manager(known).await;

        assert_eq!(manager.partition_num("events").await.unwrap(), 12);
        assert_eq!(manager.partition_num("events").await.unwrap(), 12);
        assert_eq!(meta_calls.load(Ordering::SeqCst), 1);
        assert!(created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_topics_are_created_with_the_default_shape() {
        let (manager, _, created) = manager(HashMap::new()).await;

        assert_eq!(manager.partition_num("fresh").await.unwrap(), 6);
        let created = created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "fresh");
        assert_eq!(created[0].num_partitions, 6);
    }
}
