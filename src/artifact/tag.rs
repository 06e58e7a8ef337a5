//! Attribute parsing for artifact markers.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

// name = "value" | name = 'value'
static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

/// Attributes of one opening tag. Order and quoting style are irrelevant;
/// when a name repeats, the first occurrence wins.
#[derive(Debug, Default)]
pub(crate) struct Attributes(HashMap<String, String>);

impl Attributes {
    pub(crate) fn parse(raw: &str) -> Self {
        let mut map = HashMap::new();
        for cap in ATTR_REGEX.captures_iter(raw) {
            let Some(name) = cap.get(1) else { continue };
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            map.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
        Self(map)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}
