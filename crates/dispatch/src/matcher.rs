use crate::DispatchError;

/// TableMatcher matches `schema.table` pairs against a set of glob-style
/// patterns. `*` matches any run of characters, `?` a single character; the
/// dot separating schema from table is structural and never matched by a
/// wildcard.
#[derive(Debug, Clone)]
pub struct TableMatcher {
    patterns: Vec<(String, String)>,
    case_sensitive: bool,
}

impl TableMatcher {
    pub fn parse(patterns: &[String], case_sensitive: bool) -> Result<Self, DispatchError> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let invalid = |reason: &str| DispatchError::FilterRuleInvalid {
                pattern: pattern.clone(),
                reason: reason.to_string(),
            };

            let mut parts = pattern.splitn(3, '.');
            let schema = parts.next().unwrap_or_default();
            let table = parts.next().unwrap_or("*");
            if parts.next().is_some() {
                return Err(invalid("at most one '.' separator is allowed"));
            }
            if schema.is_empty() || table.is_empty() {
                return Err(invalid("schema and table segments must be non-empty"));
            }
            for segment in [schema, table] {
                if !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '*' | '?' | '$'))
                {
                    return Err(invalid("segment holds characters outside [A-Za-z0-9_$*?-]"));
                }
            }

            let (schema, table) = if case_sensitive {
                (schema.to_string(), table.to_string())
            } else {
                (schema.to_lowercase(), table.to_lowercase())
            };
            parsed.push((schema, table));
        }
        Ok(Self {
            patterns: parsed,
            case_sensitive,
        })
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        let (schema, table) = if self.case_sensitive {
            (schema.to_string(), table.to_string())
        } else {
            (schema.to_lowercase(), table.to_lowercase())
        };
        self.patterns
            .iter()
            .any(|(s, t)| wildcard_match(s, &schema) && wildcard_match(t, &table))
    }
}

/// Iterative glob match supporting `*` and `?`.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("db?", "db1"));
        assert!(!wildcard_match("db?", "db12"));
        assert!(wildcard_match("t_*_log", "t_access_log"));
        assert!(!wildcard_match("t_*_log", "t_access_logs"));
        assert!(wildcard_match("", ""));
        assert!(!wildcard_match("", "x"));
    }

    #[test]
    fn schema_and_table_segments_match_independently() {
        let m = TableMatcher::parse(&["db1.*".to_string()], true).unwrap();
        assert!(m.matches("db1", "t1"));
        assert!(!m.matches("db2", "t1"));

        let m = TableMatcher::parse(&["*.*".to_string()], true).unwrap();
        assert!(m.matches("any", "thing"));
    }

    #[test]
    fn schema_only_pattern_covers_all_tables() {
        let m = TableMatcher::parse(&["orders".to_string()], true).unwrap();
        assert!(m.matches("orders", "t1"));
        assert!(!m.matches("orders2", "t1"));
    }

    #[test]
    fn case_folding() {
        let sensitive = TableMatcher::parse(&["DB.T".to_string()], true).unwrap();
        assert!(sensitive.matches("DB", "T"));
        assert!(!sensitive.matches("db", "t"));

        let folded = TableMatcher::parse(&["DB.T".to_string()], false).unwrap();
        assert!(folded.matches("db", "t"));
        assert!(folded.matches("Db", "T"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(TableMatcher::parse(&["a.b.c".to_string()], true).is_err());
        assert!(TableMatcher::parse(&[".t".to_string()], true).is_err());
        assert!(TableMatcher::parse(&["db.".to_string()], true).is_err());
        assert!(TableMatcher::parse(&["db.t,s".to_string()], true).is_err());
    }
}
