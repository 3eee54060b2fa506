//! Normalized query-string bag: key -> string or string list (repeated keys).

use indexmap::IndexMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl ParamValue {
    /// First value; lists report their first element.
    pub fn first(&self) -> &str {
        match self {
            ParamValue::Single(s) => s,
            ParamValue::List(v) => v.first().map(String::as_str).unwrap_or(""),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: IndexMap<String, ParamValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded pairs; a key seen more than once becomes a list.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (k, v) in pairs {
            params.push(k, v);
        }
        params
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.values.entry(key.into()) {
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(ParamValue::Single(value));
            }
            indexmap::map::Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let merged = match std::mem::replace(existing, ParamValue::List(Vec::new())) {
                    ParamValue::Single(prev) => vec![prev, value],
                    ParamValue::List(mut list) => {
                        list.push(value);
                        list
                    }
                };
                *existing = ParamValue::List(merged);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(ParamValue::first)
    }

    /// Present and not one of "", "0", "false".
    pub fn is_truthy(&self, key: &str) -> bool {
        self.get_str(key).map(is_truthy).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn is_truthy(s: &str) -> bool {
    let s = s.trim();
    !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
}
