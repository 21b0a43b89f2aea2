use crate::{
    DispatchError, Expression, PartitionDispatcher, SinkScheme, TableMatcher, TopicDispatcher,
};
use model::{DdlEvent, DispatchRule, Protocol, RowChangedEvent, SinkConfig, TableName};

struct Rule {
    matcher: TableMatcher,
    topic: TopicDispatcher,
    partition: PartitionDispatcher,
}

/// EventRouter resolves each event to a topic and partition through a
/// first-match rule list. Construction appends a synthetic `*.*` rule, so a
/// lookup can only miss if that invariant is broken.
pub struct EventRouter {
    default_topic: String,
    rules: Vec<Rule>,
}

impl EventRouter {
    pub fn new(
        config: &SinkConfig,
        default_topic: impl Into<String>,
        scheme: SinkScheme,
    ) -> Result<Self, DispatchError> {
        let default_topic = default_topic.into();

        // Events matching no configured rule dispatch by the default
        // partition rule to the default topic, via the trailing *.* rule.
        let catch_all = DispatchRule {
            matcher: vec!["*.*".to_string()],
            partition_rule: "default".to_string(),
            topic_rule: String::new(),
        };

        let mut rules = Vec::with_capacity(config.dispatch_rules.len() + 1);
        for rule in config.dispatch_rules.iter().chain(std::iter::once(&catch_all)) {
            let matcher = TableMatcher::parse(&rule.matcher, config.case_sensitive)?;
            let partition = PartitionDispatcher::for_rule(&rule.partition_rule, scheme);
            let topic = topic_dispatcher(
                &rule.topic_rule,
                &default_topic,
                config.protocol,
                scheme,
            )?;
            rules.push(Rule {
                matcher,
                topic,
                partition,
            });
        }

        Ok(Self {
            default_topic,
            rules,
        })
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    /// The destination topic of a row change.
    pub fn topic_for_row(&self, row: &RowChangedEvent) -> String {
        let rule = self.match_rule(&row.table.schema, &row.table.table);
        rule.topic.substitute(&row.table.schema, &row.table.table)
    }

    /// The destination partition of a row change, given the topic's
    /// partition count.
    pub fn partition_for_row(&self, row: &RowChangedEvent, partition_num: i32) -> (i32, String) {
        let rule = self.match_rule(&row.table.schema, &row.table.table);
        rule.partition.dispatch_row(row, partition_num)
    }

    /// The destination topic of a DDL. Prefers the pre-change table name (a
    /// rename routes with the name consumers already know); schema-scoped
    /// DDLs with no table name go to the default topic.
    pub fn topic_for_ddl(&self, ddl: &DdlEvent) -> String {
        let name = match &ddl.pre_table_info {
            Some(pre) => &pre.name,
            None => &ddl.table_info.name,
        };
        if name.table.is_empty() {
            return self.default_topic.clone();
        }
        let rule = self.match_rule(&name.schema, &name.table);
        rule.topic.substitute(&name.schema, &name.table)
    }

    /// Topics of the actively replicated tables, deduplicated, always
    /// including the default topic.
    pub fn active_topics(&self, tables: &[TableName]) -> Vec<String> {
        let mut topics = Vec::new();
        for table in tables {
            let rule = self.match_rule(&table.schema, &table.table);
            let topic = rule.topic.substitute(&table.schema, &table.table);
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        if !topics.contains(&self.default_topic) {
            topics.push(self.default_topic.clone());
        }
        topics
    }

    fn match_rule(&self, schema: &str, table: &str) -> &Rule {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(schema, table))
            .unwrap_or_else(|| {
                panic!("dispatch rules must cover all tables, none matched {schema}.{table}")
            })
    }
}

fn topic_dispatcher(
    rule: &str,
    default_topic: &str,
    protocol: Protocol,
    scheme: SinkScheme,
) -> Result<TopicDispatcher, DispatchError> {
    if rule.is_empty() {
        return Ok(TopicDispatcher::Static(default_topic.to_string()));
    }

    let expression = Expression::new(rule);
    if expression.is_hard_coded() {
        return Ok(TopicDispatcher::Static(rule.to_string()));
    }

    match scheme {
        SinkScheme::Pulsar => expression.pulsar_validate()?,
        SinkScheme::Kafka if protocol == Protocol::Avro => expression.validate_for_avro()?,
        SinkScheme::Kafka => expression.validate()?,
    }
    Ok(TopicDispatcher::Dynamic(expression))
}
