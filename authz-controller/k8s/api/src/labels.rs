use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

pub type Map = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    Exists,
    DoesNotExist,
}

/// A label selector, as accepted by list calls.
///
/// Renders to the `labelSelector` query syntax via `Display` and can be evaluated locally
/// against an object's labels with [`Selector::matches`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Vec<Expression>,
}

// === impl Selector ===

impl Selector {
    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Vec::new(),
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn exists(self, key: impl Into<String>) -> Self {
        self.expr(key, Operator::Exists, None::<String>)
    }

    pub fn does_not_exist(self, key: impl Into<String>) -> Self {
        self.expr(key, Operator::DoesNotExist, None::<String>)
    }

    pub fn is_in<V: Into<String>>(
        self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.expr(key, Operator::In, values)
    }

    fn expr<V: Into<String>>(
        mut self,
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.match_expressions.push(Expression {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Map) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for (k, v) in self.match_labels.iter() {
            write!(f, "{sep}{k}={v}")?;
            sep = ",";
        }
        for expr in self.match_expressions.iter() {
            write!(f, "{sep}{expr}")?;
            sep = ",";
        }
        Ok(())
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// === impl Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({values})", self.key),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn matches() {
        let labels = btreemap! {
            "foo".to_string() => "bar".to_string(),
            "bah".to_string() => "baz".to_string(),
        };
        for (selector, matches, msg) in [
            (Selector::default(), true, "empty match"),
            (Selector::default().label("foo", "bar"), true, "label match"),
            (Selector::default().label("foo", "baz"), false, "label mismatch"),
            (Selector::default().exists("bah"), true, "exists"),
            (Selector::default().does_not_exist("bah"), false, "does not exist"),
            (Selector::default().is_in("foo", ["a", "bar"]), true, "in"),
            (
                Selector::default().label("foo", "bar").does_not_exist("qux"),
                true,
                "combined",
            ),
        ] {
            assert_eq!(selector.matches(&labels), matches, "{msg}");
        }
    }

    #[test]
    fn renders_query_syntax() {
        let selector = Selector::default()
            .label("a", "1")
            .exists("b")
            .does_not_exist("c")
            .is_in("d", ["x", "y"]);
        assert_eq!(selector.to_string(), "a=1,b,!c,d in (x,y)");
        assert_eq!(Selector::default().to_string(), "");
    }
}
