use crate::DispatchError;

const SCHEMA_PLACEHOLDER: &str = "{schema}";
const TABLE_PLACEHOLDER: &str = "{table}";

/// A topic expression with `{schema}` / `{table}` placeholders,
/// e.g. `cdc_{schema}_{table}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression(String);

impl Expression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the expression holds no placeholder at all, and is
    /// therefore a literal topic name.
    pub fn is_hard_coded(&self) -> bool {
        !self.0.contains(SCHEMA_PLACEHOLDER) && !self.0.contains(TABLE_PLACEHOLDER)
    }

    pub fn substitute(&self, schema: &str, table: &str) -> String {
        self.0
            .replace(SCHEMA_PLACEHOLDER, schema)
            .replace(TABLE_PLACEHOLDER, table)
    }

    /// Plain validation: the expression must reference `{schema}` and
    /// otherwise hold only characters legal in a topic name.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.0.contains(SCHEMA_PLACEHOLDER) {
            return Err(self.invalid("expression must contain the {schema} placeholder"));
        }
        self.check_charset()
    }

    /// Avro-restricted validation: topics carry exactly one value schema, so
    /// the expression must end with `{schema}`. Distinct schemas may never
    /// collide on one topic.
    pub fn validate_for_avro(&self) -> Result<(), DispatchError> {
        if !self.0.ends_with(SCHEMA_PLACEHOLDER) {
            return Err(self.invalid("avro topic expressions must end with {schema}"));
        }
        self.check_charset()
    }

    /// Pulsar names are unconstrained; placeholders may appear anywhere.
    pub fn pulsar_validate(&self) -> Result<(), DispatchError> {
        if self.0.is_empty() {
            return Err(self.invalid("expression must not be empty"));
        }
        Ok(())
    }

    fn check_charset(&self) -> Result<(), DispatchError> {
        let stripped = self
            .0
            .replace(SCHEMA_PLACEHOLDER, "")
            .replace(TABLE_PLACEHOLDER, "");
        if stripped
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            Ok(())
        } else {
            Err(self.invalid("topic names may only hold [A-Za-z0-9._-]"))
        }
    }

    fn invalid(&self, reason: &str) -> DispatchError {
        DispatchError::InvalidTopicExpression {
            expression: self.0.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Resolves the destination topic of an event.
#[derive(Debug, Clone)]
pub enum TopicDispatcher {
    Static(String),
    Dynamic(Expression),
}

impl TopicDispatcher {
    pub fn substitute(&self, schema: &str, table: &str) -> String {
        match self {
            TopicDispatcher::Static(name) => name.clone(),
            TopicDispatcher::Dynamic(expression) => expression.substitute(schema, table),
        }
    }
}

impl std::fmt::Display for TopicDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicDispatcher::Static(name) => write!(f, "static({name})"),
            TopicDispatcher::Dynamic(expression) => write!(f, "dynamic({})", expression.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution() {
        let expr = Expression::new("cdc_{schema}_{table}");
        assert_eq!(expr.substitute("db1", "t1"), "cdc_db1_t1");
        assert!(!expr.is_hard_coded());
        assert!(Expression::new("plain-topic").is_hard_coded());
    }

    #[test]
    fn plain_validation() {
        assert!(Expression::new("cdc_{schema}_{table}").validate().is_ok());
        assert!(Expression::new("cdc_{table}").validate().is_err());
        assert!(Expression::new("cdc {schema}").validate().is_err());
    }

    #[test]
    fn avro_validation_pins_schema_suffix() {
        assert!(Expression::new("prefix-{schema}").validate_for_avro().is_ok());
        assert!(Expression::new("{schema}").validate_for_avro().is_ok());
        assert!(Expression::new("{schema}-suffix")
            .validate_for_avro()
            .is_err());
        assert!(Expression::new("{schema}_{table}")
            .validate_for_avro()
            .is_err());
    }

    #[test]
    fn pulsar_validation_is_lax() {
        assert!(Expression::new("persistent://tenant/ns/{table}")
            .pulsar_validate()
            .is_ok());
        assert!(Expression::new("").pulsar_validate().is_err());
    }
}
